//! JSON-RPC 2.0 envelopes.
//!
//! | Message | Direction | Shape |
//! |---------|-----------|-------|
//! | [`Request`] | Client → Server | `{jsonrpc, id, method, params}` |
//! | [`Notification`] | Both | `{jsonrpc, method, params}` (no id) |
//! | [`Response`] | Server → Client | `{jsonrpc, id, result}` or `{jsonrpc, id, error}` |
//!
//! Inbound text is classified with [`Incoming::parse`].

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::error::ProtocolError;

// ============================================================================
// Constants
// ============================================================================

/// Version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Request
// ============================================================================

/// An outbound call expecting a response.
///
/// # Format
///
/// ```json
/// { "jsonrpc": "2.0", "id": 1, "method": "page/navigate", "params": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// Correlation id.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Call parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a request envelope.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A message without correlation id. No response is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// Method name, e.g. `stream/chunk` or `event/page`.
    pub method: String,

    /// Notification payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a notification envelope.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Returns params, or `Value::Null` when absent.
    #[inline]
    #[must_use]
    pub fn params_or_null(&self) -> Value {
        self.params.clone().unwrap_or(Value::Null)
    }
}

// ============================================================================
// Error Object
// ============================================================================

/// Optional data attached to an error object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    /// Whether the call may be retried.
    #[serde(default)]
    pub retryable: bool,

    /// Suggested retry delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,

    /// Free-form structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,

    /// Human-readable message.
    pub message: String,

    /// Retry hints and details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

// ============================================================================
// Response
// ============================================================================

/// A response correlated to an earlier request.
#[derive(Debug, Clone)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result payload or mapped error.
    pub outcome: std::result::Result<Value, ProtocolError>,
}

impl Response {
    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Builds a success response envelope.
#[must_use]
pub fn success_envelope(id: &RequestId, result: Value) -> Value {
    serde_json::json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

/// Builds an error response envelope.
#[must_use]
pub fn error_envelope(id: &RequestId, error: &RpcError) -> Value {
    serde_json::json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error })
}

// ============================================================================
// Incoming
// ============================================================================

/// Classified inbound message.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Carries an id matching an earlier request.
    Response(Response),
    /// Server-pushed message without id.
    Notification(Notification),
    /// Server-initiated call (has both id and method).
    Request(Request),
}

impl Incoming {
    /// Parses and classifies raw inbound text.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not JSON
    /// - [`Error::Protocol`] if required envelope fields are missing
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(Error::protocol("message is not a JSON object"));
        };

        match map.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(Error::protocol(format!(
                    "unsupported jsonrpc version: {other}"
                )));
            }
            None => return Err(Error::protocol("missing jsonrpc field")),
        }

        let id = match map.get("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw.clone())
                    .map_err(|_| Error::protocol(format!("invalid id: {raw}")))?,
            ),
        };
        let method = map.get("method").and_then(Value::as_str).map(str::to_string);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Self::Request(Request {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                method,
                params: map.get("params").cloned(),
            })),
            (Some(id), None) => Ok(Self::Response(Self::response_from(id, &map))),
            (None, Some(method)) => Ok(Self::Notification(Notification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params: map.get("params").cloned(),
            })),
            (None, None) if map.contains_key("error") => Err(Error::protocol(
                "error response without id",
            )),
            (None, None) => Err(Error::protocol("message has neither id nor method")),
        }
    }

    /// Builds a response from an object known to carry an id.
    fn response_from(id: RequestId, map: &Map<String, Value>) -> Response {
        let outcome = match map.get("error") {
            Some(raw) => match serde_json::from_value::<RpcError>(raw.clone()) {
                Ok(error) => Err(ProtocolError::from_wire(&error)),
                Err(_) => Err(ProtocolError::from_value(raw)),
            },
            None => Ok(map.get("result").cloned().unwrap_or(Value::Null)),
        };

        Response { id, outcome }
    }
}

// ============================================================================
// Tests
// ============================================================================
