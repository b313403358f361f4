//! Document Mapping
//!
//! A [`Document`] is an immutable record built from one JSON object returned by
//! the CMDB. Short category names (e.g. `application`) are rewritten to their
//! canonical constants (`C__CATS__APPLICATION`) on construction.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CmdbError, Result};
use crate::transport::Params;

/// Readable category names and the constants they stand for
pub const CATEGORY_ALIASES: &[(&str, &str)] = &[
    ("application", "C__CATS__APPLICATION"),
    ("it_service", "C__CATG__IT_SERVICE"),
    ("version", "C__CATG__VERSION"),
    ("relation", "C__CATG__RELATION"),
    ("planning", "C__CATG__PLANNING"),
    ("global", "C__CATG__GLOBAL"),
    ("contact", "C__CATG__CONTACT"),
    ("software_assignment", "C__CATG__APPLICATION"),
    ("application_assigned_obj", "C__CATS__APPLICATION_ASSIGNED_OBJ"),
    ("application_variant", "C__CATS__APPLICATION_VARIANT"),
    ("cluster_service", "C__CATG__CLUSTER_SERVICE"),
    ("backup", "C__CATG__BACKUP"),
    ("cluster_memberships", "C__CATG__CLUSTER_MEMBERSHIPS"),
    ("power_consumer", "C__CATG__POWER_CONSUMER"),
    ("network_port", "C__CATG__NETWORK_PORT"),
    ("location", "C__CATG__LOCATION"),
    ("universal_interface", "C__CATG__UNIVERSAL_INTERFACE"),
    ("ip", "C__CATG__IP"),
    ("controller_fc_port", "C__CATG__CONTROLLER_FC_PORT"),
    ("connector", "C__CATG__CONNECTOR"),
    ("ldev_client", "C__CATG__LDEV_CLIENT"),
    ("group_memberships", "C__CATG__GROUP_MEMBERSHIPS"),
    ("person_assigned_groups", "C__CATS__PERSON_ASSIGNED_GROUPS"),
    ("database_access", "C__CATS__DATABASE_ACCESS"),
    ("database_links", "C__CATS__DATABASE_LINKS"),
    ("database_gateway", "C__CATS__DATABASE_GATEWAY"),
    ("database_schema", "C__CATS__DATABASE_SCHEMA"),
    ("it_service_components", "C__CATG__IT_SERVICE_COMPONENTS"),
    ("replication_partner", "C__CATS__REPLICATION_PARTNER"),
    ("soa_components", "C__CATG__SOA_COMPONENTS"),
    ("soa_stacks", "C__CATG__SOA_STACKS"),
    ("database_instance", "C__CATS__DATABASE_INSTANCE"),
    ("assigned_cards", "C__CATG__ASSIGNED_CARDS"),
    ("person", "C__CATS__PERSON"),
    ("logical_unit", "C__CATG__LOGICAL_UNIT"),
    ("organization", "C__CATS__ORGANIZATION"),
    ("contract_assignment", "C__CATG__CONTRACT_ASSIGNMENT"),
    ("chassis_devices", "C__CATS__CHASSIS_DEVICES"),
    ("stacking", "C__CATG__STACKING"),
    ("share_access", "C__CATG__SHARE_ACCESS"),
    ("nagios_refs_services", "C__CATG__NAGIOS_REFS_SERVICES"),
    ("net_connector", "C__CATG__NET_CONNECTOR"),
    ("cluster_adm_service", "C__CATG__CLUSTER_ADM_SERVICE"),
    ("operating_system", "C__CATG__OPERATING_SYSTEM"),
    ("qinq_sp", "C__CATG__QINQ_SP"),
    ("rm_controller", "C__CATG__RM_CONTROLLER"),
    ("file", "C__CATG__FILE"),
    ("virtual_host", "C__CATG__VIRTUAL_HOST"),
    ("vrrp", "C__CATG__VRRP"),
    ("manual", "C__CATG__MANUAL"),
    ("emergency_plan", "C__CATG__EMERGENCY_PLAN"),
];

/// Canonical attribute name for `key`
///
/// Returns the category constant for a known alias, `key` unchanged otherwise.
#[must_use]
pub fn canonical_key(key: &str) -> &str {
    CATEGORY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |&(_, constant)| constant)
}

/// What a document represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Entry of a category attached to an object
    CategoryEntry,
    /// Relation between two objects
    Relation,
    /// Software assigned to an object
    SoftwareAssignment,
    /// Object of a custom type
    CustomType,
    /// Any other record (e.g. rows of `cmdb.objects.read`)
    Generic,
}

/// Immutable attribute record built from a CMDB response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    kind: DocumentKind,
    attributes: Params,
}

impl Document {
    /// Build a document from one response object
    ///
    /// # Errors
    /// Returns `Document` if `data` is not an object or has no keys.
    pub fn from_response(kind: DocumentKind, data: &Value) -> Result<Self> {
        let object = match data {
            Value::Object(map) if !map.is_empty() => map,
            _ => return Err(CmdbError::document("cannot build document from empty data")),
        };

        let attributes = object
            .iter()
            .map(|(key, value)| (canonical_key(key).to_string(), value.clone()))
            .collect();

        Ok(Self { kind, attributes })
    }

    /// Kind of record
    #[must_use]
    pub const fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Attribute value by (canonical) name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(canonical_key(name))
    }

    /// All attributes
    #[must_use]
    pub const fn attributes(&self) -> &Params {
        &self.attributes
    }

    /// Attributes as request parameters
    #[must_use]
    pub fn to_params(&self) -> Params {
        self.attributes.clone()
    }

    /// Decode the attributes into a typed record
    ///
    /// # Errors
    /// Returns `Document` when the attributes do not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.attributes.clone()))
            .map_err(|e| CmdbError::document(format!("cannot decode {:?} document: {e}", self.kind)))
    }
}

/// Build one document per row of an array result
///
/// A single object result yields one document. Empty rows are errors.
pub fn documents_from_result(kind: DocumentKind, result: &Value) -> Result<Vec<Document>> {
    match result {
        Value::Array(rows) => rows.iter().map(|row| Document::from_response(kind, row)).collect(),
        Value::Object(_) => Ok(vec![Document::from_response(kind, result)?]),
        other => Err(CmdbError::document(format!(
            "expected an array of records, got {}",
            type_name(other)
        ))),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
