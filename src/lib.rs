//! cmdb-rpc - Client for the i-doit JSON-RPC CMDB API
//!
//! cmdb-rpc provides authenticated request/response plumbing, parameter
//! validation with a permission gate, and document mapping for the CRUD
//! endpoints of an i-doit CMDB.
//!
//! # Core Principles
//! - Validation and permission errors never reach the network
//! - Credentials and session state belong to one [`Client`] instance
//! - Server error codes and payloads are surfaced unchanged
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types (used by the CLI)
//! - [`transport`] - JSON-RPC 2.0 over HTTP
//! - [`session`] - Credentials, login/logout and the authenticated client
//! - [`config`] - Stored credential profiles and the environment snapshot
//! - [`validation`] - Parameter rules and permission levels
//! - [`endpoint`] - Resource definitions and dispatchers
//! - [`document`] - Response records with category alias mapping
//!
//! # Example
//! ```no_run
//! use cmdb_rpc::{CategoryEndpoint, Client, Credentials, Params, PermissionLevel};
//!
//! # async fn run() -> cmdb_rpc::Result<()> {
//! let client = Client::new(
//!     Credentials::new("https://cmdb.example.de/src/jsonrpc.php", "api-key")
//!         .with_login("admin", "secret"),
//! )?;
//! client.login(None, None).await?;
//!
//! let categories = CategoryEndpoint::new(&client, PermissionLevel::READ_DATA);
//! let mut params = Params::new();
//! params.insert("objID".into(), 1455.into());
//! params.insert("category".into(), "C__CATG__IP".into());
//! let entries = categories.read_entries(params).await?;
//! # let _ = entries;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod document;
pub mod endpoint;
pub mod error;
pub mod output;
pub mod session;
pub mod transport;
pub mod validation;

// Re-export commonly used types for convenience
pub use config::{
    list_profiles, load_with_precedence, remove_profile, resolve_profile, save_profile,
    session_from_env, ConfigLocation, CredentialOverrides, CredentialRegistry, StoredProfile,
};
pub use document::{canonical_key, documents_from_result, Document, DocumentKind};
pub use endpoint::{
    CategoryEndpoint, Endpoint, EndpointSpec, IdoitEndpoint, LoginInfo, ObjectsEndpoint,
    RecordStatus, SearchMode, VersionInfo, CATEGORY, OBJECT, OBJECTS,
};
pub use error::{CmdbError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use session::{Client, Credentials};
pub use transport::{BatchCall, BatchItem, Params, RequestIdPolicy, TransportOptions};
pub use validation::{Operation, PermissionLevel, RuleTable};
