//! Protocol error codes and the code → typed error mapping.
//!
//! Every error a server reports travels as a JSON-RPC error object:
//!
//! ```json
//! {
//!   "code": -32012,
//!   "message": "Element not found",
//!   "data": { "retryable": true, "retryAfterMs": 500, "details": { ... } }
//! }
//! ```
//!
//! [`map_error`] turns that triple into a [`ProtocolError`] whose
//! [`ErrorKind`] is looked up in a fixed code table. The same function is
//! used when rebuilding an error from its serialized form, so
//! [`ProtocolError::to_wire`] followed by [`ProtocolError::from_wire`]
//! reproduces code, retry flag and details.
//!
//! When the wire `data` object is present, its `retryable`, `retryAfterMs`
//! and `details` win. When it is absent the per-kind defaults apply.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value, json};
use thiserror::Error;

use super::message::{ErrorData, RpcError};

// ============================================================================
// Error Codes
// ============================================================================

/// Numeric error codes.
///
/// Standard JSON-RPC codes plus the protocol-specific `-320xx` range.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Generic server error.
    pub const SERVER_ERROR: i64 = -32000;
    /// Session has not completed the handshake.
    pub const NOT_INITIALIZED: i64 = -32001;
    /// Handshake was already performed.
    pub const ALREADY_INITIALIZED: i64 = -32002;

    /// No browser is running.
    pub const BROWSER_NOT_LAUNCHED: i64 = -32010;
    /// Page id is unknown.
    pub const PAGE_NOT_FOUND: i64 = -32011;
    /// Selector matched nothing.
    pub const ELEMENT_NOT_FOUND: i64 = -32012;
    /// Element is not visible.
    pub const ELEMENT_NOT_VISIBLE: i64 = -32013;
    /// Element is disabled.
    pub const ELEMENT_NOT_ENABLED: i64 = -32014;
    /// Navigation failed.
    pub const NAVIGATION_FAILED: i64 = -32015;
    /// Operation timed out.
    pub const TIMEOUT: i64 = -32016;
    /// Page or context was closed.
    pub const TARGET_CLOSED: i64 = -32017;
    /// Execution context went away mid-call.
    pub const EXECUTION_CONTEXT_DESTROYED: i64 = -32018;
    /// Selector matched more than one element.
    pub const SELECTOR_AMBIGUOUS: i64 = -32020;
    /// Action failed.
    pub const ACTION_FAILED: i64 = -32021;
    /// Request was intercepted.
    pub const INTERCEPTED_REQUEST: i64 = -32022;

    /// Browser context id is unknown.
    pub const CONTEXT_NOT_FOUND: i64 = -32023;
    /// A server-side resource limit was hit.
    pub const RESOURCE_LIMIT_EXCEEDED: i64 = -32024;

    /// Human approver denied the action.
    pub const APPROVAL_DENIED: i64 = -32030;
    /// Approval window expired.
    pub const APPROVAL_TIMEOUT: i64 = -32031;
    /// Action is waiting for approval.
    pub const APPROVAL_REQUIRED: i64 = -32032;

    /// Frame is unknown.
    pub const FRAME_NOT_FOUND: i64 = -32040;
    /// Domain is blocked by policy.
    pub const DOMAIN_NOT_ALLOWED: i64 = -32041;

    /// Stream id is unknown.
    pub const STREAM_NOT_FOUND: i64 = -32050;
    /// Stream was cancelled.
    pub const STREAM_CANCELLED: i64 = -32051;
}

// ============================================================================
// ErrorKind
// ============================================================================

/// Typed classification of a protocol error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError,
    NotInitialized,
    AlreadyInitialized,
    BrowserNotLaunched,
    PageNotFound,
    ElementNotFound,
    ElementNotVisible,
    ElementNotEnabled,
    NavigationFailed,
    Timeout,
    TargetClosed,
    ExecutionContextDestroyed,
    SelectorAmbiguous,
    ActionFailed,
    InterceptedRequest,
    ContextNotFound,
    ResourceLimitExceeded,
    ApprovalDenied,
    ApprovalTimeout,
    ApprovalRequired,
    FrameNotFound,
    DomainNotAllowed,
    StreamNotFound,
    StreamCancelled,
    /// Code outside the table.
    Other(i64),
}

/// Code table: `(code, kind, default retryable, default retry-after ms)`.
const CODE_TABLE: &[(i64, ErrorKind, bool, Option<u64>)] = &[
    (codes::PARSE_ERROR, ErrorKind::ParseError, false, None),
    (codes::INVALID_REQUEST, ErrorKind::InvalidRequest, false, None),
    (codes::METHOD_NOT_FOUND, ErrorKind::MethodNotFound, false, None),
    (codes::INVALID_PARAMS, ErrorKind::InvalidParams, false, None),
    (codes::INTERNAL_ERROR, ErrorKind::InternalError, false, None),
    (codes::SERVER_ERROR, ErrorKind::ServerError, false, None),
    (codes::NOT_INITIALIZED, ErrorKind::NotInitialized, false, None),
    (codes::ALREADY_INITIALIZED, ErrorKind::AlreadyInitialized, false, None),
    (codes::BROWSER_NOT_LAUNCHED, ErrorKind::BrowserNotLaunched, false, None),
    (codes::PAGE_NOT_FOUND, ErrorKind::PageNotFound, false, None),
    (codes::ELEMENT_NOT_FOUND, ErrorKind::ElementNotFound, true, Some(500)),
    (codes::ELEMENT_NOT_VISIBLE, ErrorKind::ElementNotVisible, true, Some(500)),
    (codes::ELEMENT_NOT_ENABLED, ErrorKind::ElementNotEnabled, true, Some(500)),
    (codes::NAVIGATION_FAILED, ErrorKind::NavigationFailed, true, Some(1000)),
    (codes::TIMEOUT, ErrorKind::Timeout, true, Some(0)),
    (codes::TARGET_CLOSED, ErrorKind::TargetClosed, false, None),
    (
        codes::EXECUTION_CONTEXT_DESTROYED,
        ErrorKind::ExecutionContextDestroyed,
        true,
        Some(100),
    ),
    (codes::SELECTOR_AMBIGUOUS, ErrorKind::SelectorAmbiguous, false, None),
    (codes::ACTION_FAILED, ErrorKind::ActionFailed, false, None),
    (codes::INTERCEPTED_REQUEST, ErrorKind::InterceptedRequest, false, None),
    (codes::CONTEXT_NOT_FOUND, ErrorKind::ContextNotFound, false, None),
    (
        codes::RESOURCE_LIMIT_EXCEEDED,
        ErrorKind::ResourceLimitExceeded,
        false,
        None,
    ),
    (codes::APPROVAL_DENIED, ErrorKind::ApprovalDenied, false, None),
    (codes::APPROVAL_TIMEOUT, ErrorKind::ApprovalTimeout, true, None),
    (codes::APPROVAL_REQUIRED, ErrorKind::ApprovalRequired, false, None),
    (codes::FRAME_NOT_FOUND, ErrorKind::FrameNotFound, false, None),
    (codes::DOMAIN_NOT_ALLOWED, ErrorKind::DomainNotAllowed, false, None),
    (codes::STREAM_NOT_FOUND, ErrorKind::StreamNotFound, false, None),
    (codes::STREAM_CANCELLED, ErrorKind::StreamCancelled, false, None),
];

impl ErrorKind {
    /// Looks up the kind for a numeric code.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        CODE_TABLE
            .iter()
            .find(|(c, ..)| *c == code)
            .map_or(Self::Other(code), |(_, kind, ..)| *kind)
    }

    /// Returns the numeric code for this kind.
    #[must_use]
    pub fn code(self) -> i64 {
        if let Self::Other(code) = self {
            return code;
        }
        CODE_TABLE
            .iter()
            .find(|(_, kind, ..)| *kind == self)
            .map_or(codes::INTERNAL_ERROR, |(code, ..)| *code)
    }

    /// Returns `(retryable, retry_after_ms)` defaults for this kind.
    #[must_use]
    pub fn retry_defaults(self) -> (bool, Option<u64>) {
        CODE_TABLE
            .iter()
            .find(|(_, kind, ..)| *kind == self)
            .map_or((false, None), |(_, _, retryable, after)| (*retryable, *after))
    }

    /// Message used when the server sends an empty one.
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError => "Server error",
            Self::NotInitialized => "Client not initialized. Call connect() first.",
            Self::AlreadyInitialized => "Client already initialized",
            Self::BrowserNotLaunched => "Browser not launched. Call launch() first.",
            Self::PageNotFound => "Page not found",
            Self::ElementNotFound => "Element not found",
            Self::ElementNotVisible => "Element not visible",
            Self::ElementNotEnabled => "Element not enabled",
            Self::NavigationFailed => "Navigation failed",
            Self::Timeout => "Timeout",
            Self::TargetClosed => "target was closed",
            Self::ExecutionContextDestroyed => "Execution context was destroyed",
            Self::SelectorAmbiguous => "Selector matched multiple elements",
            Self::ActionFailed => "Action failed",
            Self::InterceptedRequest => "Request intercepted",
            Self::ContextNotFound => "Context not found",
            Self::ResourceLimitExceeded => "Resource limit exceeded",
            Self::ApprovalDenied => "Approval denied",
            Self::ApprovalTimeout => "Approval timed out",
            Self::ApprovalRequired => "Approval required",
            Self::FrameNotFound => "Frame not found",
            Self::DomainNotAllowed => "Domain not allowed",
            Self::StreamNotFound => "Stream not found",
            Self::StreamCancelled => "Stream was cancelled",
            Self::Other(_) => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "Other({code})"),
            kind => fmt::Debug::fmt(kind, f),
        }
    }
}

// ============================================================================
// ProtocolError
// ============================================================================

/// A typed protocol error carrying retry semantics.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (code {code})")]
pub struct ProtocolError {
    kind: ErrorKind,
    code: i64,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
    details: Option<Value>,
}

/// Maps a numeric code, message and optional data payload to a typed error.
///
/// Unknown codes produce [`ErrorKind::Other`] and keep everything the wire
/// carried.
#[must_use]
pub fn map_error(code: i64, message: impl Into<String>, data: Option<&ErrorData>) -> ProtocolError {
    let kind = ErrorKind::from_code(code);
    let (default_retryable, default_after) = kind.retry_defaults();

    let (retryable, retry_after_ms, details) = match data {
        Some(data) => {
            let after = data
                .retry_after_ms
                .or(if data.retryable { default_after } else { None });
            (data.retryable, after, data.details.clone())
        }
        None => (default_retryable, default_after, None),
    };

    let message = message.into();
    let message = if message.is_empty() {
        kind.default_message().to_string()
    } else {
        message
    };

    ProtocolError {
        kind,
        code,
        message,
        retryable,
        retry_after: retry_after_ms.map(Duration::from_millis),
        details,
    }
}

impl ProtocolError {
    /// Creates an error of the given kind with the kind's retry defaults.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let (retryable, after) = kind.retry_defaults();
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
            retryable,
            retry_after: after.map(Duration::from_millis),
            details: None,
        }
    }

    /// Rebuilds an error from its wire form.
    #[inline]
    #[must_use]
    pub fn from_wire(error: &RpcError) -> Self {
        map_error(error.code, error.message.clone(), error.data.as_ref())
    }

    /// Rebuilds an error from a loosely-typed JSON object.
    ///
    /// Missing fields fall back to `InternalError` / `"Unknown error"`.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let code = value
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(codes::INTERNAL_ERROR);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        let data = value
            .get("data")
            .and_then(|d| serde_json::from_value::<ErrorData>(d.clone()).ok());

        map_error(code, message, data.as_ref())
    }

    /// Serializes to the wire error object.
    ///
    /// An absent retry delay is omitted from the wire. When the error is
    /// retryable, [`from_wire`](Self::from_wire) refills it from the code
    /// table, so that field does not round-trip exactly.
    #[must_use]
    pub fn to_wire(&self) -> RpcError {
        RpcError {
            code: self.code,
            message: self.message.clone(),
            data: Some(ErrorData {
                retryable: self.retryable,
                retry_after_ms: self.retry_after.map(|d| d.as_millis() as u64),
                details: self.details.clone(),
            }),
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Overrides the retry semantics.
    #[must_use]
    pub fn with_retry(mut self, retryable: bool, retry_after: Option<Duration>) -> Self {
        self.retryable = retryable;
        self.retry_after = retry_after;
        self
    }
}

// ============================================================================
// ProtocolError - Constructors
// ============================================================================

impl ProtocolError {
    /// Call timed out waiting for a response.
    #[must_use]
    pub fn timeout(method: &str, timeout: Duration) -> Self {
        Self::new(ErrorKind::Timeout, format!("Request timeout: {method}")).with_details(json!({
            "method": method,
            "timeout": timeout.as_millis() as u64,
        }))
    }

    /// Session was closed locally while the call was outstanding.
    #[must_use]
    pub fn client_closed() -> Self {
        Self::new(ErrorKind::ServerError, "Client closed")
    }

    /// Call attempted before the handshake completed.
    #[must_use]
    pub fn not_initialized() -> Self {
        Self::new(ErrorKind::NotInitialized, ErrorKind::NotInitialized.default_message())
    }

    /// Handshake attempted on a session that is not disconnected.
    #[must_use]
    pub fn already_initialized() -> Self {
        Self::new(
            ErrorKind::AlreadyInitialized,
            ErrorKind::AlreadyInitialized.default_message(),
        )
    }

    /// Server does not know the method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorKind::MethodNotFound, format!("Method not found: {method}"))
    }

    /// Page id is unknown to the server.
    #[must_use]
    pub fn page_not_found(page_id: &str) -> Self {
        Self::new(ErrorKind::PageNotFound, format!("Page not found: {page_id}"))
            .with_details(json!({ "pageId": page_id }))
    }

    /// Selector matched nothing.
    #[must_use]
    pub fn element_not_found(selector: Value) -> Self {
        Self::new(ErrorKind::ElementNotFound, "Element not found")
            .with_details(json!({ "selector": selector }))
    }

    /// Stream id is unknown.
    #[must_use]
    pub fn stream_not_found(stream_id: &str) -> Self {
        Self::new(ErrorKind::StreamNotFound, format!("Stream not found: {stream_id}"))
            .with_details(json!({ "streamId": stream_id }))
    }

    /// Approver rejected the action.
    #[must_use]
    pub fn approval_denied(reason: Option<&str>, rule: Option<&str>) -> Self {
        let message = match reason {
            Some(reason) => format!("Approval denied: {reason}"),
            None => "Approval denied".to_string(),
        };
        let error = Self::new(ErrorKind::ApprovalDenied, message);
        if reason.is_some() || rule.is_some() {
            error.with_details(json!({ "reason": reason, "rule": rule }))
        } else {
            error
        }
    }
}

// ============================================================================
// ProtocolError - Accessors
// ============================================================================

impl ProtocolError {
    /// Typed kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable numeric code.
    #[inline]
    #[must_use]
    pub fn code(&self) -> i64 {
        self.code
    }

    /// Human-readable message.
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the same call may succeed if attempted again.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Suggested delay before retrying.
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Structured details from the error's data payload.
    #[inline]
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Returns a detail field by key, if details are an object.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|map: &Map<String, Value>| map.get(key))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_table_is_bijective() {
        for (code, kind, ..) in CODE_TABLE {
            assert_eq!(ErrorKind::from_code(*code), *kind);
            assert_eq!(kind.code(), *code);
        }
    }

    #[test]
    fn test_unknown_code_falls_back() {
        let data = ErrorData {
            retryable: true,
            retry_after_ms: Some(250),
            details: Some(json!({ "hint": "busy" })),
        };
        let err = map_error(-39999, "custom failure", Some(&data));

        assert_eq!(err.kind(), ErrorKind::Other(-39999));
        assert_eq!(err.code(), -39999);
        assert_eq!(err.message(), "custom failure");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(250)));
        assert_eq!(err.detail("hint"), Some(&json!("busy")));
    }

    #[test]
    fn test_defaults_without_data() {
        let err = map_error(codes::ELEMENT_NOT_FOUND, "no match", None);
        assert_eq!(err.kind(), ErrorKind::ElementNotFound);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_millis(500)));

        let err = map_error(codes::TARGET_CLOSED, "page closed", None);
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_data_overrides_defaults() {
        let data = ErrorData {
            retryable: false,
            retry_after_ms: None,
            details: Some(json!({ "selector": "#go" })),
        };
        let err = map_error(codes::ELEMENT_NOT_FOUND, "Element not found", Some(&data));
        assert!(!err.is_retryable());
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.detail("selector"), Some(&json!("#go")));
    }

    #[test]
    fn test_empty_message_uses_default() {
        let err = map_error(codes::STREAM_CANCELLED, "", None);
        assert_eq!(err.message(), "Stream was cancelled");
    }

    #[test]
    fn test_timeout_constructor() {
        let err = ProtocolError::timeout("page/navigate", Duration::from_secs(30));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.code(), codes::TIMEOUT);
        assert!(err.is_retryable());
        assert!(err.message().contains("page/navigate"));
        assert_eq!(err.detail("timeout"), Some(&json!(30_000)));
    }

    #[test]
    fn test_client_closed_not_retryable() {
        let err = ProtocolError::client_closed();
        assert_eq!(err.code(), codes::SERVER_ERROR);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Client closed (code -32000)");
    }

    #[test]
    fn test_from_value_missing_fields() {
        let err = ProtocolError::from_value(&json!({}));
        assert_eq!(err.code(), codes::INTERNAL_ERROR);
        assert_eq!(err.message(), "Unknown error");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_value_full() {
        let err = ProtocolError::from_value(&json!({
            "code": -32050,
            "message": "Stream not found: s9",
            "data": { "retryable": false, "details": { "streamId": "s9" } }
        }));
        assert_eq!(err.kind(), ErrorKind::StreamNotFound);
        assert_eq!(err.detail("streamId"), Some(&json!("s9")));
    }

    #[test]
    fn test_approval_denied_details() {
        let err = ProtocolError::approval_denied(Some("too risky"), None);
        assert_eq!(err.message(), "Approval denied: too risky");
        assert_eq!(err.detail("reason"), Some(&json!("too risky")));

        let bare = ProtocolError::approval_denied(None, None);
        assert!(bare.details().is_none());
    }

    fn any_code() -> impl Strategy<Value = i64> {
        prop_oneof![
            proptest::sample::select(CODE_TABLE.iter().map(|(c, ..)| *c).collect::<Vec<_>>()),
            -40000i64..-30000,
        ]
    }

    proptest! {
        #[test]
        fn prop_wire_round_trip(
            code in any_code(),
            message in "[a-zA-Z ]{1,40}",
            retryable in any::<bool>(),
            after in proptest::option::of(0u64..60_000),
            detail in proptest::option::of("[a-z]{1,12}"),
        ) {
            let original = ProtocolError::new(ErrorKind::from_code(code), message)
                .with_retry(retryable, after.map(Duration::from_millis));
            let original = match detail {
                Some(d) => original.with_details(json!({ "key": d })),
                None => original,
            };

            let wire = serde_json::to_value(original.to_wire()).expect("serialize");
            let parsed: RpcError = serde_json::from_value(wire).expect("deserialize");
            let rebuilt = ProtocolError::from_wire(&parsed);

            prop_assert_eq!(rebuilt.code(), original.code());
            prop_assert_eq!(rebuilt.kind(), original.kind());
            prop_assert_eq!(rebuilt.is_retryable(), original.is_retryable());
            prop_assert_eq!(rebuilt.details(), original.details());
            prop_assert_eq!(rebuilt.message(), original.message());

            let expected_after = match after {
                Some(ms) => Some(Duration::from_millis(ms)),
                None if retryable => original
                    .kind()
                    .retry_defaults()
                    .1
                    .map(Duration::from_millis),
                None => None,
            };
            prop_assert_eq!(rebuilt.retry_after(), expected_after);
        }
    }
}
