//! JSON-RPC 2.0 Transport
//!
//! This module builds JSON-RPC envelopes, POSTs them to the CMDB endpoint and
//! classifies the response.
//!
//! # Wire Format
//! - Request: `{"method": "...", "params": {...}, "jsonrpc": "2.0", "id": N}`
//! - Success: `{"result": ...}`
//! - Failure: `{"error": {"code": N, "message": "...", "data": ...}}`
//!
//! # Request Ids
//! The id is produced by a [`RequestIdPolicy`]. The default repeats `0` on every
//! request, which the i-doit server accepts; `Sequential` numbers requests instead.
//! Batches always number their entries `0..n` so responses can be matched by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::{CmdbError, Result};

/// JSON-RPC protocol version sent with every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Header carrying the session token after login
pub const HEADER_SESSION: &str = "x-rpc-auth-session";
/// Header carrying the username for basic authentication
pub const HEADER_USERNAME: &str = "x-rpc-auth-username";
/// Header carrying the password for basic authentication
pub const HEADER_PASSWORD: &str = "x-rpc-auth-password";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Named request parameters (the `params` object of an envelope)
pub type Params = Map<String, Value>;

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub params: Params,
    pub jsonrpc: String,
    pub id: u64,
}

impl RequestEnvelope {
    /// Create an envelope, rejecting an empty method name
    pub fn new(method: impl Into<String>, params: Params, id: u64) -> Result<Self> {
        let method = method.into();
        if method.trim().is_empty() {
            return Err(CmdbError::invalid_params("JSON-RPC method name cannot be empty"));
        }
        Ok(Self { method, params, jsonrpc: JSONRPC_VERSION.to_string(), id })
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// How request ids are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestIdPolicy {
    /// Every request carries the same id
    Constant(u64),
    /// Ids increase by one per request, starting at `start`
    Sequential { start: u64 },
}

impl Default for RequestIdPolicy {
    fn default() -> Self {
        Self::Constant(0)
    }
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Upper bound for one HTTP exchange
    pub timeout: Duration,

    /// Request id assignment
    pub request_id: RequestIdPolicy,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            request_id: RequestIdPolicy::default(),
        }
    }
}

/// One call inside a batch request
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub method: String,
    pub params: Params,
}

impl BatchCall {
    /// Create a new batch call
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self { method: method.into(), params }
    }
}

/// Outcome of one call inside a batch, in submission order
#[derive(Debug)]
pub struct BatchItem {
    /// Positional id the call was sent with
    pub id: u64,

    /// Method that was called
    pub method: String,

    /// The call's result or its own error
    pub outcome: Result<Value>,
}

impl BatchItem {
    /// Whether this call succeeded
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Classify a JSON-RPC error by code, keeping the server's payload
///
/// When the server omits `data`, its `message` is carried instead.
#[must_use]
pub fn classify_error(code: i64, message: Option<String>, data: Option<Value>) -> CmdbError {
    let payload = data.or_else(|| message.map(Value::String));
    CmdbError::from_rpc(code, payload)
}

/// Turn one response envelope into its result or classified error
fn into_outcome(body: Value) -> Result<Value> {
    let Value::Object(mut envelope) = body else {
        return Err(CmdbError::transport("JSON-RPC response is not an object"));
    };

    match envelope.remove("error") {
        Some(Value::Null) | None => {}
        Some(error) => {
            let error: RpcErrorObject = serde_json::from_value(error).map_err(|e| {
                CmdbError::transport(format!("Malformed JSON-RPC error object: {e}"))
            })?;
            return Err(classify_error(error.code, error.message, error.data));
        }
    }

    envelope
        .remove("result")
        .ok_or_else(|| CmdbError::transport("JSON-RPC response has neither 'result' nor 'error'"))
}

/// HTTP transport for one CMDB endpoint URL
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    request_id: RequestIdPolicy,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for `url`
    ///
    /// # Errors
    /// Returns `Config` for an unparsable URL and `Transport` if the HTTP client
    /// cannot be constructed.
    pub fn new(url: &str, options: TransportOptions) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| CmdbError::config_error(format!("Invalid CMDB URL '{url}': {e}")))?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| CmdbError::transport(format!("Could not build HTTP client: {e}")))?;

        let start = match options.request_id {
            RequestIdPolicy::Constant(id) => id,
            RequestIdPolicy::Sequential { start } => start,
        };

        Ok(Self { client, url, request_id: options.request_id, next_id: AtomicU64::new(start) })
    }

    /// Endpoint URL requests are posted to
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    fn next_id(&self) -> u64 {
        match self.request_id {
            RequestIdPolicy::Constant(id) => id,
            RequestIdPolicy::Sequential { .. } => self.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Send one JSON-RPC call and return its `result`
    ///
    /// `headers` are merged over the default `content-type` header.
    pub async fn send(&self, method: &str, params: Params, headers: HeaderMap) -> Result<Value> {
        let envelope = RequestEnvelope::new(method, params, self.next_id())?;
        debug!(method = %envelope.method, id = envelope.id, "sending JSON-RPC request");

        let body = self.post(&envelope, headers).await?;
        into_outcome(body)
    }

    /// Send several calls as one JSON array
    ///
    /// Each item reports its own outcome; failures are logged and never abort
    /// the rest. Only a failure of the HTTP exchange itself returns `Err`.
    pub async fn send_batch(
        &self,
        calls: Vec<BatchCall>,
        headers: HeaderMap,
    ) -> Result<Vec<BatchItem>> {
        let mut items = Vec::with_capacity(calls.len());
        let mut envelopes = Vec::with_capacity(calls.len());

        for (position, call) in calls.into_iter().enumerate() {
            let id = position as u64;
            match RequestEnvelope::new(call.method.clone(), call.params, id) {
                Ok(envelope) => {
                    envelopes.push(envelope);
                    items.push(BatchItem { id, method: call.method, outcome: Ok(Value::Null) });
                }
                Err(e) => items.push(BatchItem { id, method: call.method, outcome: Err(e) }),
            }
        }

        if envelopes.is_empty() {
            return Ok(items);
        }

        debug!(calls = envelopes.len(), "sending JSON-RPC batch");
        let body = self.post(&envelopes, headers).await?;

        let responses = match body {
            Value::Array(responses) => responses,
            // A single envelope answers the batch as a whole
            other => {
                into_outcome(other)?;
                return Err(CmdbError::transport("JSON-RPC batch response is not an array"));
            }
        };

        let mut outcomes: HashMap<u64, Result<Value>> = HashMap::new();
        for response in responses {
            match response.get("id").and_then(Value::as_u64) {
                Some(id) => {
                    outcomes.insert(id, into_outcome(response));
                }
                None => warn!("discarding batch response without a numeric id"),
            }
        }

        for item in items.iter_mut().filter(|item| item.outcome.is_ok()) {
            item.outcome = outcomes.remove(&item.id).unwrap_or_else(|| {
                Err(CmdbError::transport(format!("No response for batch request id {}", item.id)))
            });
        }

        for item in items.iter().filter(|item| !item.is_ok()) {
            if let Err(e) = &item.outcome {
                warn!(id = item.id, method = %item.method, error = %e, "batch call failed");
            }
        }

        Ok(items)
    }

    async fn post<T: Serialize + ?Sized>(&self, payload: &T, headers: HeaderMap) -> Result<Value> {
        let response =
            self.client.post(self.url.clone()).headers(headers).json(payload).send().await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => Ok(body),
            Err(_) if !status.is_success() => Err(CmdbError::transport(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&bytes).trim()
            ))),
            Err(e) => Err(CmdbError::transport(format!("Response is not valid JSON: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_envelope_rejects_empty_method() {
        let err = RequestEnvelope::new("  ", Params::new(), 0).unwrap_err();
        assert!(matches!(err, CmdbError::InvalidParams { .. }));
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope =
            RequestEnvelope::new("idoit.version", params(json!({"apikey": "k"})), 0).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"method": "idoit.version", "params": {"apikey": "k"}, "jsonrpc": "2.0", "id": 0})
        );
    }

    #[test]
    fn test_into_outcome() {
        assert_eq!(into_outcome(json!({"result": {"success": true}})).unwrap(), json!({"success": true}));
        assert_eq!(into_outcome(json!({"result": null, "error": null})).unwrap(), Value::Null);

        let err = into_outcome(json!({"error": {"code": -32601, "message": "nope"}})).unwrap_err();
        assert!(matches!(err, CmdbError::MethodNotFound { .. }));
        assert_eq!(err.data(), Some(&json!("nope")));

        let err = into_outcome(json!({"jsonrpc": "2.0"})).unwrap_err();
        assert!(matches!(err, CmdbError::Transport(_)));

        let err = into_outcome(json!([1, 2])).unwrap_err();
        assert!(matches!(err, CmdbError::Transport(_)));
    }

    #[test]
    fn test_classify_prefers_data_over_message() {
        let err = classify_error(-32603, Some("msg".into()), Some(json!({"detail": 1})));
        assert_eq!(err.data(), Some(&json!({"detail": 1})));
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = HttpTransport::new("not a url", TransportOptions::default()).unwrap_err();
        assert!(matches!(err, CmdbError::Config(_)));
    }

    #[test]
    fn test_request_id_policies() {
        let constant = HttpTransport::new(
            "http://localhost/src/jsonrpc.php",
            TransportOptions { request_id: RequestIdPolicy::Constant(7), ..Default::default() },
        )
        .unwrap();
        assert_eq!(constant.next_id(), 7);
        assert_eq!(constant.next_id(), 7);

        let sequential = HttpTransport::new(
            "http://localhost/src/jsonrpc.php",
            TransportOptions {
                request_id: RequestIdPolicy::Sequential { start: 1 },
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(sequential.next_id(), 1);
        assert_eq!(sequential.next_id(), 2);
        assert_eq!(sequential.next_id(), 3);
    }

    #[tokio::test]
    async fn test_send_returns_result() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({"method": "idoit.version", "jsonrpc": "2.0"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 0, "result": {"version": "1.14.2"}})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&mock_server.uri(), TransportOptions::default()).unwrap();
        let result = transport.send("idoit.version", Params::new(), HeaderMap::new()).await.unwrap();
        assert_eq!(result, json!({"version": "1.14.2"}));
    }

    #[tokio::test]
    async fn test_send_non_json_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&mock_server.uri(), TransportOptions::default()).unwrap();
        let err = transport.send("idoit.version", Params::new(), HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, CmdbError::Transport(_)));
        assert!(err.message().contains("502"));
    }

    #[tokio::test]
    async fn test_send_batch_matches_by_id() {
        let mock_server = MockServer::start().await;

        // Server answers out of order and reports an error for the second call
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc": "2.0", "id": 2, "result": "third"},
                {"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "data": "bad"}},
                {"jsonrpc": "2.0", "id": 0, "result": "first"}
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&mock_server.uri(), TransportOptions::default()).unwrap();
        let items = transport
            .send_batch(
                vec![
                    BatchCall::new("cmdb.objects.read", Params::new()),
                    BatchCall::new("cmdb.category.read", Params::new()),
                    BatchCall::new("idoit.version", Params::new()),
                ],
                HeaderMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].outcome.as_ref().unwrap(), &json!("first"));
        assert!(matches!(items[1].outcome, Err(CmdbError::InvalidParams { .. })));
        assert_eq!(items[2].outcome.as_ref().unwrap(), &json!("third"));
        assert_eq!(items[1].method, "cmdb.category.read");
    }

    #[tokio::test]
    async fn test_send_batch_missing_and_local_failures() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"jsonrpc": "2.0", "id": 0, "result": 1}])),
            )
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(&mock_server.uri(), TransportOptions::default()).unwrap();
        let items = transport
            .send_batch(
                vec![
                    BatchCall::new("idoit.version", Params::new()),
                    BatchCall::new("", Params::new()),
                    BatchCall::new("idoit.constants", Params::new()),
                ],
                HeaderMap::new(),
            )
            .await
            .unwrap();

        assert!(items[0].is_ok());
        assert!(matches!(items[1].outcome, Err(CmdbError::InvalidParams { .. })));
        assert!(matches!(items[2].outcome, Err(CmdbError::Transport(_))));
    }
}
