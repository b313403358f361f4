//! Endpoint Definitions
//!
//! Each CMDB resource is described by a static [`EndpointSpec`]: the RPC method
//! prefix, the supported operations and the parameter [`RuleTable`].
//! [`Endpoint`] dispatches calls against an [`EndpointSpec`].
//!
//! # Dispatch Order
//! 1. Operation must be supported by the resource
//! 2. Permission gate
//! 3. Parameter validation
//! 4. Parameter filtering
//! 5. Network call through the [`Client`]
//!
//! Steps 1-4 never touch the network.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::document::{documents_from_result, Document, DocumentKind};
use crate::error::{CmdbError, Result};
use crate::session::Client;
use crate::transport::Params;
use crate::validation::{self, Applies, Operation, PermissionLevel, RuleTable};

const CRUD: &[Operation] = &Operation::ALL;

/// Static description of one CMDB resource
#[derive(Debug, Clone, Copy)]
pub struct EndpointSpec {
    /// RPC method prefix (e.g. `cmdb.category`)
    pub method_prefix: &'static str,

    /// Operations the resource supports
    pub operations: &'static [Operation],

    /// Parameter rules
    pub rules: RuleTable,
}

impl EndpointSpec {
    /// Full RPC method name for `operation`
    #[must_use]
    pub fn method(&self, operation: Operation) -> String {
        format!("{}.{}", self.method_prefix, operation.as_str())
    }

    /// Whether `operation` is supported
    #[must_use]
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }
}

/// Category entries of an object (`cmdb.category.*`)
pub const CATEGORY: EndpointSpec = EndpointSpec {
    method_prefix: "cmdb.category",
    operations: CRUD,
    rules: RuleTable {
        required: &[("objID", Applies::All)],
        interchangeable: &[(&["category", "catgID", "catsID"], Applies::All)],
        optional: &[
            ("status", Applies::Only(&[Operation::Read, Operation::Update])),
            ("data", Applies::Only(&[Operation::Create, Operation::Update])),
            ("id", Applies::Only(&[Operation::Update, Operation::Delete])),
        ],
    },
};

/// Single objects (`cmdb.object.*`)
pub const OBJECT: EndpointSpec = EndpointSpec {
    method_prefix: "cmdb.object",
    operations: CRUD,
    rules: RuleTable {
        required: &[
            ("type", Applies::Only(&[Operation::Create])),
            ("title", Applies::Only(&[Operation::Create])),
            ("id", Applies::Only(&[Operation::Read, Operation::Update, Operation::Delete])),
        ],
        interchangeable: &[],
        optional: &[
            ("title", Applies::Only(&[Operation::Update])),
            ("status", Applies::Only(&[Operation::Delete])),
            ("description", Applies::Only(&[Operation::Create])),
            ("purpose", Applies::Only(&[Operation::Create])),
            ("category", Applies::Only(&[Operation::Create])),
        ],
    },
};

/// Object listing (`cmdb.objects.read`)
pub const OBJECTS: EndpointSpec = EndpointSpec {
    method_prefix: "cmdb.objects",
    operations: &[Operation::Read],
    rules: RuleTable {
        required: &[],
        interchangeable: &[],
        optional: &[
            ("filter", Applies::All),
            ("limit", Applies::All),
            ("sort", Applies::All),
            ("order_by", Applies::All),
            ("categories", Applies::All),
        ],
    },
};

/// Generic dispatcher for an [`EndpointSpec`]
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    client: &'a Client,
    spec: &'static EndpointSpec,
    permission: PermissionLevel,
}

impl<'a> Endpoint<'a> {
    /// Create an endpoint with the given permission level
    #[must_use]
    pub const fn new(client: &'a Client, spec: &'static EndpointSpec, permission: PermissionLevel) -> Self {
        Self { client, spec, permission }
    }

    /// The resource description
    #[must_use]
    pub const fn spec(&self) -> &'static EndpointSpec {
        self.spec
    }

    /// Permission level of this instance
    #[must_use]
    pub const fn permission(&self) -> PermissionLevel {
        self.permission
    }

    /// Run `operation` with `params`
    ///
    /// Parameters not declared for the operation are dropped before sending.
    ///
    /// # Errors
    /// - `InvalidParams` for an unsupported operation or a rule violation
    /// - `Permission` when the level is too low
    /// - any transport or server error
    pub async fn call(&self, operation: Operation, params: Params) -> Result<Value> {
        let method = self.spec.method(operation);
        if !self.spec.supports(operation) {
            return Err(CmdbError::invalid_params(format!(
                "{} does not support {operation}",
                self.spec.method_prefix
            )));
        }

        self.permission.check(operation, &method)?;
        let params = validation::validate_and_filter(&self.spec.rules, operation, &params)?;

        debug!(method = %method, params = params.len(), "dispatching endpoint call");
        self.client.request(&method, params).await
    }

    /// Run `operation` with parameters taken from a document's attributes
    pub async fn call_document(&self, operation: Operation, document: &Document) -> Result<Value> {
        self.call(operation, document.to_params()).await
    }

    pub async fn create(&self, params: Params) -> Result<Value> {
        self.call(Operation::Create, params).await
    }

    pub async fn read(&self, params: Params) -> Result<Value> {
        self.call(Operation::Read, params).await
    }

    pub async fn update(&self, params: Params) -> Result<Value> {
        self.call(Operation::Update, params).await
    }

    pub async fn delete(&self, params: Params) -> Result<Value> {
        self.call(Operation::Delete, params).await
    }

    /// Signature listing of the resource
    #[must_use]
    pub fn describe(&self) -> String {
        validation::describe(self.spec.method_prefix, self.spec.operations, &self.spec.rules)
    }
}

/// Record status filter for category reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Normal,
    Archived,
    Deleted,
}

impl RecordStatus {
    /// Wire constant
    #[must_use]
    pub const fn as_constant(&self) -> &'static str {
        match self {
            Self::Normal => "C__RECORD_STATUS__NORMAL",
            Self::Archived => "C__RECORD_STATUS__ARCHIVED",
            Self::Deleted => "C__RECORD_STATUS__DELETED",
        }
    }
}

/// `cmdb.category` with a default record status for reads
#[derive(Debug, Clone, Copy)]
pub struct CategoryEndpoint<'a> {
    endpoint: Endpoint<'a>,
    default_read_status: RecordStatus,
}

impl<'a> CategoryEndpoint<'a> {
    /// Create a category endpoint reading `Normal` records by default
    #[must_use]
    pub fn new(client: &'a Client, permission: PermissionLevel) -> Self {
        Self {
            endpoint: Endpoint::new(client, &CATEGORY, permission),
            default_read_status: RecordStatus::Normal,
        }
    }

    /// Override the status applied to reads without an explicit `status`
    #[must_use]
    pub fn with_default_read_status(mut self, status: RecordStatus) -> Self {
        self.default_read_status = status;
        self
    }

    #[must_use]
    pub const fn default_read_status(&self) -> RecordStatus {
        self.default_read_status
    }

    /// Underlying generic endpoint
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint<'a> {
        &self.endpoint
    }

    pub async fn create(&self, params: Params) -> Result<Value> {
        self.endpoint.create(params).await
    }

    /// Read category entries
    ///
    /// Adds the default `status` when the caller did not pass one.
    pub async fn read(&self, mut params: Params) -> Result<Value> {
        if params.get("status").map_or(true, Value::is_null) {
            params.insert("status".to_string(), Value::from(self.default_read_status.as_constant()));
        }
        self.endpoint.read(params).await
    }

    /// Read category entries as documents
    pub async fn read_entries(&self, params: Params) -> Result<Vec<Document>> {
        let result = self.read(params).await?;
        documents_from_result(DocumentKind::CategoryEntry, &result)
    }

    pub async fn update(&self, params: Params) -> Result<Value> {
        self.endpoint.update(params).await
    }

    pub async fn delete(&self, params: Params) -> Result<Value> {
        self.endpoint.delete(params).await
    }

    /// Run `operation` with a document's attributes (reads get the default status)
    pub async fn call_document(&self, operation: Operation, document: &Document) -> Result<Value> {
        match operation {
            Operation::Read => self.read(document.to_params()).await,
            _ => self.endpoint.call_document(operation, document).await,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.endpoint.describe()
    }
}

/// `cmdb.objects.read`
#[derive(Debug, Clone, Copy)]
pub struct ObjectsEndpoint<'a> {
    endpoint: Endpoint<'a>,
}

impl<'a> ObjectsEndpoint<'a> {
    #[must_use]
    pub fn new(client: &'a Client, permission: PermissionLevel) -> Self {
        Self { endpoint: Endpoint::new(client, &OBJECTS, permission) }
    }

    /// List objects
    pub async fn read(&self, params: Params) -> Result<Value> {
        self.endpoint.read(params).await
    }

    /// List objects as documents
    pub async fn read_documents(&self, params: Params) -> Result<Vec<Document>> {
        let result = self.read(params).await?;
        documents_from_result(DocumentKind::Generic, &result)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.endpoint.describe()
    }
}

/// Search mode of `idoit.search`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    #[default]
    Normal,
    Deep,
    AutoDeep,
}

impl SearchMode {
    /// Wire value
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Deep => "deep",
            Self::AutoDeep => "auto-deep",
        }
    }
}

/// Logged-in user as reported by `idoit.version`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    pub userid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Result of `idoit.version`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub version_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginInfo>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// `idoit.*` system methods
///
/// These calls read instance metadata only and are not permission-gated.
#[derive(Debug)]
pub struct IdoitEndpoint<'a> {
    client: &'a Client,
    version: OnceCell<VersionInfo>,
    constants: OnceCell<Value>,
}

impl<'a> IdoitEndpoint<'a> {
    #[must_use]
    pub fn new(client: &'a Client) -> Self {
        Self { client, version: OnceCell::new(), constants: OnceCell::new() }
    }

    /// Version and login information, fetched once and cached
    pub async fn version(&self) -> Result<&VersionInfo> {
        self.version.get_or_try_init(|| fetch_version(self.client)).await
    }

    /// Drop the cached version information and fetch it again
    pub async fn refresh_version(&mut self) -> Result<&VersionInfo> {
        self.version = OnceCell::new();
        self.version().await
    }

    /// All constants known to the instance, fetched once and cached
    pub async fn constants(&self) -> Result<&Value> {
        self.constants
            .get_or_try_init(|| self.client.request("idoit.constants", Params::new()))
            .await
    }

    /// Drop the cached constants and fetch them again
    pub async fn refresh_constants(&mut self) -> Result<&Value> {
        self.constants = OnceCell::new();
        self.constants().await
    }

    /// Full-text search
    pub async fn search(&self, query: &str, mode: SearchMode) -> Result<Value> {
        let mut params = Params::new();
        params.insert("q".to_string(), Value::from(query));
        params.insert("mode".to_string(), Value::from(mode.as_str()));
        self.client.request("idoit.search", params).await
    }
}

async fn fetch_version(client: &Client) -> Result<VersionInfo> {
    let result = client.request("idoit.version", Params::new()).await?;
    serde_json::from_value(result)
        .map_err(|e| CmdbError::transport(format!("unexpected idoit.version result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Credentials;
    use serde_json::json;

    fn client() -> Client {
        Client::new(Credentials::new("https://cmdb.example.de", "k").with_login("admin", "pw")).unwrap()
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_method_names() {
        assert_eq!(CATEGORY.method(Operation::Create), "cmdb.category.create");
        assert_eq!(OBJECTS.method(Operation::Read), "cmdb.objects.read");
        assert!(!OBJECTS.supports(Operation::Delete));
        assert!(OBJECT.supports(Operation::Delete));
    }

    #[test]
    fn test_category_rules() {
        let ok = params(json!({"objID": 1455, "category": "C__CATS__APPLICATION"}));
        for operation in Operation::ALL {
            assert!(validation::validate(&CATEGORY.rules, operation, &ok).is_ok());
        }

        let err = validation::validate(&CATEGORY.rules, Operation::Update, &params(json!({"objID": 1})))
            .unwrap_err();
        assert!(err.message().contains("mutually exclusive required parameters"));

        let filtered = validation::filter_params(
            &CATEGORY.rules,
            Operation::Create,
            &params(json!({"objID": 1, "catgID": 2, "data": {"title": "x"}, "status": "s", "id": 3})),
        );
        assert_eq!(filtered, params(json!({"objID": 1, "catgID": 2, "data": {"title": "x"}})));
    }

    #[test]
    fn test_object_rules() {
        let create = params(json!({"type": "C__OBJTYPE__SERVER", "title": "srv01", "purpose": "x"}));
        assert!(validation::validate(&OBJECT.rules, Operation::Create, &create).is_ok());

        let err = validation::validate(&OBJECT.rules, Operation::Create, &params(json!({"title": "srv01"})))
            .unwrap_err();
        assert!(err.message().contains("'type'"));

        assert!(validation::validate(&OBJECT.rules, Operation::Read, &params(json!({"id": 7}))).is_ok());
        let filtered =
            validation::filter_params(&OBJECT.rules, Operation::Update, &params(json!({"id": 7, "title": "new", "type": "x"})));
        assert_eq!(filtered, params(json!({"id": 7, "title": "new"})));
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let client = client();
        let endpoint = Endpoint::new(&client, &OBJECTS, PermissionLevel::DELETE_ENTRIES);
        let err = endpoint.delete(Params::new()).await.unwrap_err();
        assert!(matches!(err, CmdbError::InvalidParams { .. }));
        assert!(err.message().contains("cmdb.objects does not support delete"));
    }

    #[tokio::test]
    async fn test_permission_checked_before_validation() {
        let client = client();
        let endpoint = Endpoint::new(&client, &CATEGORY, PermissionLevel::READ_DATA);
        // Parameters are invalid too; the permission error wins.
        let err = endpoint.delete(Params::new()).await.unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn test_validation_fails_without_network() {
        // Nothing listens on this address; reaching the network would be a transport error.
        let client = Client::new(Credentials::new("http://127.0.0.1:9", "k").with_login("a", "b")).unwrap();
        let endpoint = CategoryEndpoint::new(&client, PermissionLevel::DELETE_ENTRIES);
        let err = endpoint.update(params(json!({"objID": 1, "apikey": "x"}))).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMS");
    }

    #[test]
    fn test_category_default_status() {
        let client = client();
        let endpoint = CategoryEndpoint::new(&client, PermissionLevel::READ_DATA);
        assert_eq!(endpoint.default_read_status(), RecordStatus::Normal);
        let endpoint = endpoint.with_default_read_status(RecordStatus::Archived);
        assert_eq!(endpoint.default_read_status().as_constant(), "C__RECORD_STATUS__ARCHIVED");
    }

    #[test]
    fn test_search_mode_wire_values() {
        assert_eq!(SearchMode::AutoDeep.as_str(), "auto-deep");
        assert_eq!(serde_json::to_value(SearchMode::AutoDeep).unwrap(), json!("auto-deep"));
        assert_eq!(SearchMode::default(), SearchMode::Normal);
    }

    #[test]
    fn test_version_info_decoding() {
        let info: VersionInfo = serde_json::from_value(json!({
            "login": {"userid": "9", "name": "admin ", "mail": "sample@mail.com", "username": "admin",
                      "tenant": "Sample GmbH", "language": "en"},
            "version": "1.14.2", "step": "", "type": "PRO"
        }))
        .unwrap();
        assert_eq!(info.version, "1.14.2");
        assert_eq!(info.version_type, "PRO");
        let login = info.login.unwrap();
        assert_eq!(login.userid.as_deref(), Some("9"));
        assert_eq!(login.tenant.as_deref(), Some("Sample GmbH"));

        let info: VersionInfo =
            serde_json::from_value(json!({"version": "1.15", "login": {"userid": 9}})).unwrap();
        assert_eq!(info.login.unwrap().userid.as_deref(), Some("9"));
    }

    #[test]
    fn test_version_info_null_fields() {
        let info: VersionInfo =
            serde_json::from_value(json!({"version": "1.14.2", "step": null, "type": null, "login": null}))
                .unwrap();
        assert_eq!(info.version, "1.14.2");
        assert_eq!(info.step, "");
        assert_eq!(info.version_type, "");
        assert!(info.login.is_none());
    }

    #[test]
    fn test_category_describe() {
        let client = client();
        let text = CategoryEndpoint::new(&client, PermissionLevel::READ_DATA).describe();
        assert!(text.starts_with("API METHOD TARGET: cmdb.category"));
        assert!(text.contains("    delete()"));
        assert!(text.contains("['category', 'catgID', 'catsID']"));
    }
}
