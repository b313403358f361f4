//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout cmdb-rpc.
//! Every error maps to a stable error code for the CLI's JSON output.
//!
//! # Error Categories
//! - `InvalidParams`: Client-side validation failure or server code `-32602`
//! - `InternalError`: Server code `-32603`
//! - `MethodNotFound`: Server code `-32601`
//! - `Authentication`: Login/session failure or server code `-32604`
//! - `Permission`: Local permission level too low (never reaches the network)
//! - `Unknown`: Any other server error code
//! - `Transport`: HTTP, network or malformed-response failures
//! - `Config`: Credential file or profile errors
//! - `Document`: A document could not be built from response data

use serde_json::Value;
use thiserror::Error;

/// JSON-RPC error code for invalid method parameters
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code for an internal server error
pub const CODE_INTERNAL_ERROR: i64 = -32603;
/// JSON-RPC error code for an unknown method
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// i-doit error code for authentication failures
pub const CODE_AUTHENTICATION: i64 = -32604;

/// Main error type for cmdb-rpc operations
#[derive(Error, Debug)]
pub enum CmdbError {
    /// Invalid method parameter(s), detected locally or reported by the server
    #[error("Invalid params: {message}")]
    InvalidParams { message: String, data: Option<Value> },

    /// Internal JSON-RPC error reported by the server
    #[error("Internal error (-32603): {}", render_data(.data))]
    InternalError { data: Option<Value> },

    /// The method does not exist or is not available
    #[error("Method not found (-32601): {}", render_data(.data))]
    MethodNotFound { data: Option<Value> },

    /// Login or session failure
    #[error("Authentication error: {message}")]
    Authentication { message: String, data: Option<Value> },

    /// Permission level of the endpoint is too low for the operation
    #[error(
        "Permission level too low for '{operation}': required {required}, current {current}"
    )]
    Permission { operation: String, required: u8, current: u8 },

    /// Server reported an error code this client does not recognise
    #[error("Unknown error ({code}): {}", render_data(.data))]
    Unknown { code: i64, data: Option<Value> },

    /// HTTP, network or response decoding failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error (file not found, invalid JSON, missing profile)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document construction failure
    #[error("Document error: {0}")]
    Document(String),
}

fn render_data(data: &Option<Value>) -> String {
    match data {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "no details".to_string(),
    }
}

impl CmdbError {
    /// Convert error to error code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => "INVALID_PARAMS",
            Self::InternalError { .. } => "INTERNAL_ERROR",
            Self::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Permission { .. } => "PERMISSION_DENIED",
            Self::Unknown { .. } => "UNKNOWN_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Document(_) => "DOCUMENT_ERROR",
        }
    }

    /// JSON-RPC code of a server-side error kind, if it has one
    #[must_use]
    pub const fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::InvalidParams { .. } => Some(CODE_INVALID_PARAMS),
            Self::InternalError { .. } => Some(CODE_INTERNAL_ERROR),
            Self::MethodNotFound { .. } => Some(CODE_METHOD_NOT_FOUND),
            Self::Authentication { .. } => Some(CODE_AUTHENTICATION),
            Self::Unknown { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Server-supplied `data` payload, unchanged
    #[must_use]
    pub const fn data(&self) -> Option<&Value> {
        match self {
            Self::InvalidParams { data, .. }
            | Self::InternalError { data }
            | Self::MethodNotFound { data }
            | Self::Authentication { data, .. }
            | Self::Unknown { data, .. } => data.as_ref(),
            _ => None,
        }
    }

    /// Get human-readable error message
    ///
    /// Never contains credentials; server payloads are included as sent.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Classify a JSON-RPC error object by its numeric code
    #[must_use]
    pub fn from_rpc(code: i64, data: Option<Value>) -> Self {
        match code {
            CODE_INVALID_PARAMS => Self::InvalidParams {
                message: format!("server rejected parameters: {}", render_data(&data)),
                data,
            },
            CODE_INTERNAL_ERROR => Self::InternalError { data },
            CODE_METHOD_NOT_FOUND => Self::MethodNotFound { data },
            CODE_AUTHENTICATION => Self::Authentication {
                message: format!("server rejected credentials: {}", render_data(&data)),
                data,
            },
            _ => Self::Unknown { code, data },
        }
    }

    /// Create a client-side invalid params error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams { message: message.into(), data: None }
    }

    /// Create a client-side authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), data: None }
    }

    /// Create a permission error
    pub fn permission(operation: impl Into<String>, required: u8, current: u8) -> Self {
        Self::Permission { operation: operation.into(), required, current }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a document error
    pub fn document(message: impl Into<String>) -> Self {
        Self::Document(message.into())
    }

    /// Whether this error should invalidate a cached session
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

impl From<reqwest::Error> for CmdbError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest's Display includes the URL but never headers
        Self::Transport(err.to_string())
    }
}

/// Result type alias for cmdb-rpc operations
pub type Result<T> = std::result::Result<T, CmdbError>;
