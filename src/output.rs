//! JSON Output Envelope Types
//!
//! Structured JSON output printed by the `cmdb` binary.
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "message": "...", "rpc_code": ..., "data": ...}}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CmdbError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Command that was executed (login, search, version, ...)
    pub command: String,

    /// Command-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Command that was attempted
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    /// Create error envelope from a `CmdbError`, keeping the server's code and data
    pub fn from_error(command: impl Into<String>, err: &CmdbError) -> Self {
        Self::new(
            command,
            ErrorInfo {
                code: err.error_code().to_string(),
                message: err.message(),
                rpc_code: err.rpc_code(),
                data: err.data().cloned(),
            },
        )
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "INVALID_PARAMS", "PERMISSION_DENIED")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// JSON-RPC error code reported by the server, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_code: Option<i64>,

    /// Server `data` payload, unchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorInfo {
    /// Create a new error info without server details
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), rpc_code: None, data: None }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of entries returned (for list results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries_returned: Option<usize>,
}

impl Metadata {
    /// Create new metadata with just execution time
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, entries_returned: None }
    }

    /// Create new metadata with execution time and entry count
    pub fn with_entries(execution_ms: u64, entries_returned: usize) -> Self {
        Self { execution_ms, entries_returned: Some(entries_returned) }
    }

    /// Metadata for a result value, counting entries when it is an array
    pub fn for_result(execution_ms: u64, result: &Value) -> Self {
        match result.as_array() {
            Some(entries) => Self::with_entries(execution_ms, entries.len()),
            None => Self::new(execution_ms),
        }
    }
}
