//! Credential Profiles
//!
//! This module loads and saves named CMDB credential profiles and reads the
//! environment snapshot used by the CLI.
//!
//! # Configuration Locations
//! - Local: `.cmdb/credentials.json` (per working directory)
//! - Global: `~/.config/cmdb/credentials.json` (per user)
//!
//! # Resolution Precedence
//! 1. Explicit CLI flags (highest priority)
//! 2. Environment snapshot (`CMDB_URL`, `CMDB_API_KEY`, `CMDB_USER`, `CMDB_PASS`)
//! 3. Stored profile (local profiles override global ones with the same name)
//!
//! # File Format
//! ```json
//! {
//!   "profiles": {
//!     "prod": { "url": "https://cmdb.example.de/src/jsonrpc.php", "api_key": "...", "username": "admin" }
//!   },
//!   "default": "prod"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CmdbError, Result};
use crate::session::Credentials;
use crate::validation::PermissionLevel;

/// Environment variable holding the endpoint URL
pub const ENV_URL: &str = "CMDB_URL";
/// Environment variable holding the API key
pub const ENV_API_KEY: &str = "CMDB_API_KEY";
/// Environment variable holding the username
pub const ENV_USER: &str = "CMDB_USER";
/// Environment variable holding the password
pub const ENV_PASS: &str = "CMDB_PASS";
/// Environment variable holding a session token from an earlier login
pub const ENV_SESSION_ID: &str = "CMDB_SESSION_ID";

/// Partially known credentials from one source (flags, environment or profile)
///
/// Sources are layered with [`CredentialOverrides::or`]; the first source
/// that sets a field wins.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialOverrides {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for CredentialOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialOverrides")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialOverrides {
    /// One-shot snapshot of the `CMDB_*` environment variables
    ///
    /// Empty values count as unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            url: env_value(ENV_URL),
            api_key: env_value(ENV_API_KEY),
            username: env_value(ENV_USER),
            password: env_value(ENV_PASS),
        }
    }

    /// Fill fields missing here from `fallback`
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            url: self.url.or(fallback.url),
            api_key: self.api_key.or(fallback.api_key),
            username: self.username.or(fallback.username),
            password: self.password.or(fallback.password),
        }
    }

    /// Build complete credentials
    ///
    /// # Errors
    /// Returns `Config` when the URL or API key is missing, or the URL does not parse.
    pub fn into_credentials(self) -> Result<Credentials> {
        let url = self.url.ok_or_else(|| {
            CmdbError::config_error(format!(
                "No CMDB URL given. Pass --url, set {ENV_URL} or log in with a saved profile."
            ))
        })?;
        url::Url::parse(&url)
            .map_err(|e| CmdbError::config_error(format!("Invalid CMDB URL '{url}': {e}")))?;

        let api_key = self.api_key.ok_or_else(|| {
            CmdbError::config_error(format!(
                "No API key given. Pass --api-key, set {ENV_API_KEY} or log in with a saved profile."
            ))
        })?;

        Ok(Credentials { url, api_key, username: self.username, password: self.password })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl Credentials {
    /// Credentials from the `CMDB_*` environment variables
    ///
    /// The environment is read once; later changes do not affect the result.
    pub fn from_env() -> Result<Self> {
        CredentialOverrides::from_env().into_credentials()
    }
}

/// Session token from `CMDB_SESSION_ID`, if set
#[must_use]
pub fn session_from_env() -> Option<String> {
    env_value(ENV_SESSION_ID)
}

/// Stored credential profile
///
/// The password may be stored directly or referenced through an
/// environment variable (`password_env`).
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredProfile {
    /// Endpoint URL
    pub url: String,

    /// API key
    pub api_key: String,

    /// Username for login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password stored in plain text (prefer `password_env`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name for the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Session token from the last `cmdb login --save`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Permission level used by the CLI for this profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_level: Option<PermissionLevel>,
}

impl std::fmt::Debug for StoredProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredProfile")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password_env", &self.password_env)
            .field("session_id", &self.session_id.as_ref().map(|_| "<redacted>"))
            .field("permission_level", &self.permission_level)
            .finish_non_exhaustive()
    }
}

impl StoredProfile {
    /// Create a profile from complete credentials
    #[must_use]
    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            url: credentials.url.clone(),
            api_key: credentials.api_key.clone(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            password_env: None,
            session_id: None,
            permission_level: None,
        }
    }

    /// Resolve the password reference and return the profile as an override layer
    ///
    /// # Errors
    /// Returns `Config` if `password_env` names a variable that is not set.
    pub fn resolve(&self) -> Result<CredentialOverrides> {
        let password = match &self.password_env {
            Some(env_var) => Some(std::env::var(env_var).map_err(|_| {
                CmdbError::config_error(format!("Environment variable {env_var} not found for password"))
            })?),
            None => self.password.clone(),
        };

        Ok(CredentialOverrides {
            url: Some(self.url.clone()),
            api_key: Some(self.api_key.clone()),
            username: self.username.clone(),
            password,
        })
    }
}

/// Profile registry as stored in one credentials file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRegistry {
    /// Named profiles
    #[serde(default)]
    pub profiles: BTreeMap<String, StoredProfile>,

    /// Name of the default profile (must exist in `profiles`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl CredentialRegistry {
    /// Overlay `local` on top of this registry
    ///
    /// Local profiles replace profiles with the same name; a local default
    /// replaces the default.
    #[must_use]
    pub fn merged_with(mut self, local: Self) -> Self {
        self.profiles.extend(local.profiles);
        if local.default.is_some() {
            self.default = local.default;
        }
        self
    }

    /// Look up a profile by name, or the default profile when `name` is `None`
    ///
    /// # Errors
    /// Returns `Config` naming the available profiles when nothing matches.
    pub fn get(&self, name: Option<&str>) -> Result<(&str, &StoredProfile)> {
        let available = || self.profiles.keys().cloned().collect::<Vec<_>>();

        let name = match name {
            Some(n) => n,
            None => self.default.as_deref().ok_or_else(|| {
                CmdbError::config_error(format!(
                    "No default profile set. Available profiles: {:?}. \
                     Specify one with --profile or run 'cmdb login --save'.",
                    available()
                ))
            })?,
        };

        self.profiles
            .get_key_value(name)
            .map(|(key, profile)| (key.as_str(), profile))
            .ok_or_else(|| {
                CmdbError::config_error(format!(
                    "Profile '{name}' not found. Available profiles: {:?}",
                    available()
                ))
            })
    }

    /// Insert or replace a profile; the first profile becomes the default
    pub fn insert(&mut self, name: impl Into<String>, profile: StoredProfile) {
        let name = name.into();
        if self.profiles.is_empty() || self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.profiles.insert(name, profile);
    }

    /// Remove a profile, clearing the default if it pointed there
    ///
    /// Returns the removed profile.
    pub fn remove(&mut self, name: &str) -> Option<StoredProfile> {
        let removed = self.profiles.remove(name);
        if self.default.as_deref() == Some(name) {
            self.default = None;
        }
        removed
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLocation {
    /// Local file: `.cmdb/credentials.json`
    Local,
    /// Global file: `~/.config/cmdb/credentials.json`
    Global,
}

impl ConfigLocation {
    /// Path of the credentials file for this location
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_config_path(),
            Self::Global => global_config_path(),
        }
    }
}

/// Get path to local credentials file (`.cmdb/credentials.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        CmdbError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".cmdb").join("credentials.json"))
}

/// Get path to global credentials file (`~/.config/cmdb/credentials.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| CmdbError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("cmdb").join("credentials.json"))
}

/// Load a registry from a credentials file
///
/// A missing file yields an empty registry.
pub fn load_registry(path: &Path) -> Result<CredentialRegistry> {
    if !path.exists() {
        return Ok(CredentialRegistry::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| CmdbError::config_error(format!("Could not read credentials file: {e}")))?;

    serde_json::from_str(&contents).map_err(|e| {
        CmdbError::config_error(format!(
            "Invalid credentials file format in {}: {e}",
            path.display()
        ))
    })
}

/// Save a registry to a credentials file, creating parent directories
pub fn save_registry(path: &Path, registry: &CredentialRegistry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CmdbError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(registry)
        .map_err(|e| CmdbError::config_error(format!("Could not serialize credentials: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| CmdbError::config_error(format!("Could not write credentials file: {e}")))?;

    debug!(path = %path.display(), profiles = registry.profiles.len(), "credentials saved");
    Ok(())
}

/// Load and merge the global and local registries (local wins)
pub fn load_with_precedence() -> Result<CredentialRegistry> {
    load_merged(&local_config_path()?, &global_config_path()?)
}

/// Merge the registries at explicit paths (local wins)
pub fn load_merged(local_path: &Path, global_path: &Path) -> Result<CredentialRegistry> {
    let global = load_registry(global_path)?;
    let local = load_registry(local_path)?;
    Ok(global.merged_with(local))
}

/// Resolve a stored profile into an override layer
///
/// `None` selects the default profile of the merged registry.
pub fn resolve_profile(name: Option<&str>) -> Result<CredentialOverrides> {
    let registry = load_with_precedence()?;
    let (_, profile) = registry.get(name)?;
    profile.resolve()
}

/// Save a profile to the given location
///
/// The first profile saved to a file becomes that file's default.
pub fn save_profile(name: &str, profile: StoredProfile, location: ConfigLocation) -> Result<()> {
    save_profile_at(&location.path()?, name, profile)
}

/// Save a profile to an explicit credentials file
pub fn save_profile_at(path: &Path, name: &str, profile: StoredProfile) -> Result<()> {
    let mut registry = load_registry(path)?;
    registry.insert(name, profile);
    save_registry(path, &registry)
}

/// Remove a profile from the given location
///
/// Returns whether a profile was removed.
pub fn remove_profile(name: &str, location: ConfigLocation) -> Result<bool> {
    remove_profile_at(&location.path()?, name)
}

/// Remove a profile from an explicit credentials file
pub fn remove_profile_at(path: &Path, name: &str) -> Result<bool> {
    let mut registry = load_registry(path)?;
    if registry.remove(name).is_none() {
        return Ok(false);
    }
    save_registry(path, &registry)?;
    Ok(true)
}

/// List all profiles of the merged registry with their URLs
///
/// Profiles whose password reference cannot be resolved are still listed;
/// a warning is logged without the reason to avoid leaking secrets.
pub fn list_profiles() -> Result<Vec<(String, String)>> {
    let registry = load_with_precedence()?;

    let mut profiles = Vec::new();
    for (name, profile) in &registry.profiles {
        if profile.resolve().is_err() {
            warn!(profile = %name, "password reference of profile could not be resolved");
        }
        profiles.push((name.clone(), profile.url.clone()));
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(url: &str) -> StoredProfile {
        StoredProfile {
            url: url.to_string(),
            api_key: "key".to_string(),
            username: Some("admin".to_string()),
            password: Some("pw".to_string()),
            password_env: None,
            session_id: None,
            permission_level: None,
        }
    }

    #[test]
    fn test_overrides_layering() {
        let flags = CredentialOverrides { url: Some("https://flag".into()), ..Default::default() };
        let env = CredentialOverrides {
            url: Some("https://env".into()),
            api_key: Some("env-key".into()),
            ..Default::default()
        };
        let stored = CredentialOverrides {
            url: Some("https://stored".into()),
            api_key: Some("stored-key".into()),
            username: Some("stored-user".into()),
            password: None,
        };

        let merged = flags.or(env).or(stored);
        assert_eq!(merged.url.as_deref(), Some("https://flag"));
        assert_eq!(merged.api_key.as_deref(), Some("env-key"));
        assert_eq!(merged.username.as_deref(), Some("stored-user"));
        assert!(merged.password.is_none());
    }

    #[test]
    fn test_into_credentials_requires_url_and_key() {
        let err = CredentialOverrides::default().into_credentials().unwrap_err();
        assert!(err.message().contains(ENV_URL));

        let err = CredentialOverrides { url: Some("https://cmdb.example.de".into()), ..Default::default() }
            .into_credentials()
            .unwrap_err();
        assert!(err.message().contains(ENV_API_KEY));

        let err = CredentialOverrides {
            url: Some("not a url".into()),
            api_key: Some("k".into()),
            ..Default::default()
        }
        .into_credentials()
        .unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_overrides_debug_redacts_secrets() {
        let overrides = CredentialOverrides {
            api_key: Some("secret-key".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let debug = format!("{overrides:?}");
        assert!(!debug.contains("secret-key"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_profile_resolve_direct_password() {
        let resolved = profile("https://cmdb.example.de").resolve().unwrap();
        assert_eq!(resolved.password.as_deref(), Some("pw"));
        assert_eq!(resolved.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_profile_resolve_env_password() {
        std::env::set_var("CMDB_TEST_PROFILE_PASSWORD", "secret");

        let mut stored = profile("https://cmdb.example.de");
        stored.password = None;
        stored.password_env = Some("CMDB_TEST_PROFILE_PASSWORD".to_string());

        let resolved = stored.resolve().unwrap();
        assert_eq!(resolved.password.as_deref(), Some("secret"));

        std::env::remove_var("CMDB_TEST_PROFILE_PASSWORD");
    }

    #[test]
    fn test_profile_resolve_missing_env_var() {
        let mut stored = profile("https://cmdb.example.de");
        stored.password_env = Some("CMDB_TEST_NONEXISTENT_VAR".to_string());

        let err = stored.resolve().unwrap_err();
        assert!(err.message().contains("Environment variable CMDB_TEST_NONEXISTENT_VAR not found"));
    }

    #[test]
    fn test_optional_fields_not_serialized_when_none() {
        let json = serde_json::to_string(&profile("https://cmdb.example.de")).unwrap();
        assert!(!json.contains("password_env"));
        assert!(!json.contains("session_id"));
        assert!(!json.contains("permission_level"));
    }

    #[test]
    fn test_permission_level_serialized_as_number() {
        let mut stored = profile("https://cmdb.example.de");
        stored.permission_level = Some(PermissionLevel::UPDATE_ENTRIES);
        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains(r#""permission_level":40"#));
    }

    #[test]
    fn test_first_profile_becomes_default() {
        let mut registry = CredentialRegistry::default();
        registry.insert("prod", profile("https://prod"));
        registry.insert("test", profile("https://test"));
        assert_eq!(registry.default.as_deref(), Some("prod"));

        let (name, stored) = registry.get(None).unwrap();
        assert_eq!(name, "prod");
        assert_eq!(stored.url, "https://prod");
    }

    #[test]
    fn test_remove_default_profile_clears_default() {
        let mut registry = CredentialRegistry::default();
        registry.insert("prod", profile("https://prod"));
        assert!(registry.remove("prod").is_some());
        assert!(registry.default.is_none());
        assert!(registry.remove("prod").is_none());

        let err = registry.get(None).unwrap_err();
        assert!(err.message().contains("No default profile"));
    }

    #[test]
    fn test_missing_profile_lists_available() {
        let mut registry = CredentialRegistry::default();
        registry.insert("prod", profile("https://prod"));
        let err = registry.get(Some("staging")).unwrap_err();
        assert!(err.message().contains("staging"));
        assert!(err.message().contains("prod"));
    }

    #[test]
    fn test_local_overrides_global() {
        let mut global = CredentialRegistry::default();
        global.insert("shared", profile("https://global"));
        global.insert("global-only", profile("https://global-only"));

        let mut local = CredentialRegistry::default();
        local.insert("shared", profile("https://local"));

        let merged = global.merged_with(local);
        assert_eq!(merged.profiles.len(), 2);
        assert_eq!(merged.profiles["shared"].url, "https://local");
        assert_eq!(merged.default.as_deref(), Some("shared"));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = load_registry(&dir.path().join("missing.json")).unwrap();
        assert!(registry.profiles.is_empty());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_registry(&path).unwrap_err();
        assert!(err.message().contains("Invalid credentials file format"));
    }

    #[test]
    fn test_save_and_remove_profile_at() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".cmdb").join("credentials.json");

        save_profile_at(&path, "prod", profile("https://prod")).unwrap();
        save_profile_at(&path, "test", profile("https://test")).unwrap();

        let registry = load_registry(&path).unwrap();
        assert_eq!(registry.profiles.len(), 2);
        assert_eq!(registry.default.as_deref(), Some("prod"));
        assert_eq!(registry.profiles["test"], profile("https://test"));

        assert!(remove_profile_at(&path, "test").unwrap());
        assert!(!remove_profile_at(&path, "test").unwrap());
        assert_eq!(load_registry(&path).unwrap().profiles.len(), 1);
    }

    #[test]
    fn test_load_merged_from_files() {
        let dir = TempDir::new().unwrap();
        let local_path = dir.path().join("local.json");
        let global_path = dir.path().join("global.json");

        save_profile_at(&global_path, "shared", profile("https://global")).unwrap();
        save_profile_at(&local_path, "shared", profile("https://local")).unwrap();

        let merged = load_merged(&local_path, &global_path).unwrap();
        assert_eq!(merged.profiles["shared"].url, "https://local");
    }
}
