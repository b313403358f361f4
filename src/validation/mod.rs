//! Request Validation and Permission Gate
//!
//! Every endpoint declares a [`RuleTable`] describing which parameters each
//! operation needs. Calls are checked against it before anything is sent.
//!
//! # Validation Strategy
//! - `required`: the parameter must be present and non-null
//! - `interchangeable`: at least one parameter of the group must be present and non-null
//! - `optional`: documented and allowed through, never enforced
//! - Parameters no applicable rule declares are dropped from the request body
//!
//! # Permission Levels
//! An endpoint carries a [`PermissionLevel`]; each [`Operation`] has a fixed
//! minimum (read < create < update < delete). A level that is too low fails
//! before validation and before any network activity.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::error::{CmdbError, Result};
use crate::transport::Params;

/// CRUD operation on an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    /// All operations in signature order
    pub const ALL: [Self; 4] = [Self::Create, Self::Read, Self::Update, Self::Delete];

    /// Method suffix on the wire (`cmdb.category.<suffix>`)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Minimum permission level needed to run this operation
    #[must_use]
    pub const fn required_level(&self) -> PermissionLevel {
        match self {
            Self::Read => PermissionLevel::READ_DATA,
            Self::Create => PermissionLevel::CREATE_ENTRIES,
            Self::Update => PermissionLevel::UPDATE_ENTRIES,
            Self::Delete => PermissionLevel::DELETE_ENTRIES,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Permission level of an endpoint instance
///
/// Higher levels include everything lower levels allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionLevel(pub u8);

impl PermissionLevel {
    /// Nothing may be executed
    pub const DRY_RUN: Self = Self(0);
    /// Read non-sensitive data
    pub const READ_DATA: Self = Self(10);
    /// Read sensitive data
    pub const READ_SENSITIVE_DATA: Self = Self(20);
    /// Create entries
    pub const CREATE_ENTRIES: Self = Self(30);
    /// Update entries
    pub const UPDATE_ENTRIES: Self = Self(40);
    /// Delete entries
    pub const DELETE_ENTRIES: Self = Self(50);

    /// Check that this level permits `operation` on `target`
    ///
    /// # Errors
    /// Returns `Permission` naming the target method and both levels.
    pub fn check(self, operation: Operation, target: &str) -> Result<()> {
        let required = operation.required_level();
        if self >= required {
            Ok(())
        } else {
            Err(CmdbError::permission(target, required.0, self.0))
        }
    }
}

impl Default for PermissionLevel {
    fn default() -> Self {
        Self::READ_DATA
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which operations a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applies {
    /// Every operation
    All,
    /// Only the listed operations
    Only(&'static [Operation]),
}

impl Applies {
    /// Whether the rule applies to `operation`
    #[must_use]
    pub fn includes(&self, operation: Operation) -> bool {
        match self {
            Self::All => true,
            Self::Only(operations) => operations.contains(&operation),
        }
    }
}

/// Parameter rules of one endpoint
///
/// Tables are `'static` constants and never change at runtime.
#[derive(Debug, Clone, Copy)]
pub struct RuleTable {
    /// Parameter name → operations it is required for
    pub required: &'static [(&'static str, Applies)],

    /// Alternative parameter names (at least one required) → operations
    pub interchangeable: &'static [(&'static [&'static str], Applies)],

    /// Parameter name → operations it is accepted for
    pub optional: &'static [(&'static str, Applies)],
}

impl RuleTable {
    /// A table without any rules (every parameter is dropped)
    pub const EMPTY: Self = Self { required: &[], interchangeable: &[], optional: &[] };

    /// Required parameters for `operation`
    #[must_use]
    pub fn required_for(&self, operation: Operation) -> Vec<&'static str> {
        self.required
            .iter()
            .filter(|(_, applies)| applies.includes(operation))
            .map(|(name, _)| *name)
            .collect()
    }

    /// Interchangeable groups for `operation`
    #[must_use]
    pub fn interchangeable_for(&self, operation: Operation) -> Vec<&'static [&'static str]> {
        self.interchangeable
            .iter()
            .filter(|(_, applies)| applies.includes(operation))
            .map(|(group, _)| *group)
            .collect()
    }

    /// Optional parameters for `operation`
    #[must_use]
    pub fn optional_for(&self, operation: Operation) -> Vec<&'static str> {
        self.optional
            .iter()
            .filter(|(_, applies)| applies.includes(operation))
            .map(|(name, _)| *name)
            .collect()
    }

    /// Whether `key` is declared by any rule applicable to `operation`
    #[must_use]
    pub fn declares(&self, operation: Operation, key: &str) -> bool {
        self.required_for(operation).contains(&key)
            || self.optional_for(operation).contains(&key)
            || self.interchangeable_for(operation).iter().any(|group| group.contains(&key))
    }
}

fn is_present(params: &Params, key: &str) -> bool {
    params.get(key).is_some_and(|value| !value.is_null())
}

/// Check `params` against the rules applicable to `operation`
///
/// # Errors
/// Returns `InvalidParams` naming the first missing required parameter or the
/// first unsatisfied interchangeable group.
pub fn validate(rules: &RuleTable, operation: Operation, params: &Params) -> Result<()> {
    for name in rules.required_for(operation) {
        if !is_present(params, name) {
            return Err(CmdbError::invalid_params(format!(
                "missing required parameter '{name}' for {operation}"
            )));
        }
    }

    for group in rules.interchangeable_for(operation) {
        if !group.iter().any(|name| is_present(params, name)) {
            return Err(CmdbError::invalid_params(format!(
                "{operation} needs one of the mutually exclusive required parameters {group:?}"
            )));
        }
    }

    Ok(())
}

/// Keep only the parameters declared for `operation`
///
/// Idempotent: filtering a filtered set changes nothing.
#[must_use]
pub fn filter_params(rules: &RuleTable, operation: Operation, params: &Params) -> Params {
    params
        .iter()
        .filter(|(key, _)| rules.declares(operation, key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Validate, then filter
pub fn validate_and_filter(rules: &RuleTable, operation: Operation, params: &Params) -> Result<Params> {
    validate(rules, operation, params)?;
    Ok(filter_params(rules, operation, params))
}

/// Human-readable signature listing of an endpoint
#[must_use]
pub fn describe(method_prefix: &str, operations: &[Operation], rules: &RuleTable) -> String {
    fn list(names: &[&str]) -> String {
        let quoted: Vec<String> = names.iter().map(|name| format!("'{name}'")).collect();
        format!("[{}]", quoted.join(", "))
    }

    let mut out = String::new();
    let _ = writeln!(out, "API METHOD TARGET: {method_prefix}");
    let _ = writeln!(out);
    let _ = writeln!(out, "API METHOD SIGNATURES:");

    for operation in operations {
        let groups: Vec<String> =
            rules.interchangeable_for(*operation).iter().map(|group| list(group)).collect();
        let interchangeable = if groups.is_empty() { "[]".to_string() } else { groups.join(" | ") };

        let _ = writeln!(out);
        let _ = writeln!(out, "    {operation}()");
        let _ = writeln!(out, "      REQUIRED        : {}", list(&rules.required_for(*operation)));
        let _ = writeln!(out, "      INTERCHANGEABLE : {interchangeable}");
        let _ = writeln!(out, "      OPTIONAL        : {}", list(&rules.optional_for(*operation)));
    }

    out
}
