//! Session lifecycle payloads and protocol version negotiation.
//!
//! # Handshake
//!
//! ```text
//! client                                  server
//!   | -- initialize {protocolVersion, ...} -> |
//!   | <- {protocolVersion, serverInfo, caps} - |
//!   | -- notifications/initialized ---------> |
//!   | -- events/subscribe {events} ---------> |   (only if events requested)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::StreamId;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version implemented by this client.
pub const PROTOCOL_VERSION: &str = "0.2.0";

/// Lifecycle method names.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake acknowledgement notification.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Event subscription request.
    pub const SUBSCRIBE: &str = "events/subscribe";
    /// Graceful shutdown request.
    pub const SHUTDOWN: &str = "shutdown";
    /// Cancel an in-progress stream.
    pub const STREAM_CANCEL: &str = "stream/cancel";
    /// Answer an approval prompt.
    pub const APPROVAL_RESPOND: &str = "approval/respond";
}

// ============================================================================
// ProtocolVersion
// ============================================================================

/// A `MAJOR.MINOR.PATCH` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ProtocolVersion {
    /// Creates a version from its parts.
    #[inline]
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns the version implemented by this crate.
    #[must_use]
    pub fn current() -> Self {
        Self::new(0, 2, 0)
    }

    /// Checks a server version against this (client) version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionMismatch`] if the major versions differ.
    pub fn negotiate(self, server: Self) -> Result<Compatibility> {
        if server.major != self.major {
            return Err(Error::version_mismatch(self, server));
        }
        if server.minor < self.minor {
            return Ok(Compatibility::Degraded {
                client: self,
                server,
            });
        }
        Ok(Compatibility::Full)
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> Result<u32> {
            parts
                .next()
                .ok_or_else(|| Error::protocol(format!("protocol version {s:?} missing {name}")))?
                .parse::<u32>()
                .map_err(|_| Error::protocol(format!("protocol version {s:?} has invalid {name}")))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;

        if parts.next().is_some() {
            return Err(Error::protocol(format!(
                "protocol version {s:?} has too many components"
            )));
        }

        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// ============================================================================
// Compatibility
// ============================================================================

/// Outcome of version negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Same major, server minor at least the client's.
    Full,
    /// Same major, server minor older: some features may be missing.
    Degraded {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },
}

impl Compatibility {
    /// Returns `true` for [`Compatibility::Degraded`].
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

// ============================================================================
// Initialize
// ============================================================================

/// Client identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Capabilities declared by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Event categories the client wants pushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,
}

/// Params of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_info: ClientInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ClientCapabilities>,
}

/// Server identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Capability snapshot returned by the server.
///
/// Fields this client does not know about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browsers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerCapabilities {
    /// Returns `true` if the server advertises the event category.
    #[must_use]
    pub fn supports_event(&self, category: &str) -> bool {
        self.events
            .as_ref()
            .is_some_and(|events| events.iter().any(|e| e == category))
    }
}

/// Result of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

// ============================================================================
// Subscription / Shutdown
// ============================================================================

/// Params of `events/subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeParams {
    pub events: Vec<String>,
}

/// Params of `shutdown`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_pages: Option<bool>,
}

// ============================================================================
// Stream / Approval
// ============================================================================

/// Params of `stream/cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCancelParams {
    pub stream_id: StreamId,
}

/// Result of `stream/cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCancelResult {
    pub cancelled: bool,
}

/// Answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    Approve,
    Deny,
    ApproveOnce,
    ApproveSession,
}

/// Params of `approval/respond`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRespondParams {
    pub request_id: String,
    pub decision: ApprovalDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Result of `approval/respond`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRespondResult {
    pub acknowledged: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_version() {
        let v: ProtocolVersion = "1.2.3".parse().expect("parse");
        assert_eq!(v, ProtocolVersion::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!(PROTOCOL_VERSION.parse::<ProtocolVersion>().expect("parse"), ProtocolVersion::current());
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!("1.2".parse::<ProtocolVersion>().is_err());
        assert!("1.2.3.4".parse::<ProtocolVersion>().is_err());
        assert!("one.2.3".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_negotiate_older_minor_is_degraded() {
        let client = ProtocolVersion::new(1, 2, 0);
        let outcome = client.negotiate(ProtocolVersion::new(1, 1, 0)).expect("compatible");
        assert!(outcome.is_degraded());
    }

    #[test]
    fn test_negotiate_newer_minor_is_full() {
        let client = ProtocolVersion::new(1, 2, 0);
        assert_eq!(
            client.negotiate(ProtocolVersion::new(1, 5, 9)).expect("compatible"),
            Compatibility::Full
        );
    }

    #[test]
    fn test_negotiate_major_mismatch_fails() {
        let client = ProtocolVersion::new(1, 2, 0);
        let err = client
            .negotiate(ProtocolVersion::new(2, 0, 0))
            .expect_err("mismatch");
        assert!(matches!(err, Error::VersionMismatch { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_initialize_params_omit_unset() {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            client_info: ClientInfo {
                name: "bap-client-rust".into(),
                version: "0.2.0".into(),
            },
            capabilities: Some(ClientCapabilities {
                events: Some(vec!["page".into()]),
                ..Default::default()
            }),
        };

        let value = serde_json::to_value(&params).expect("serialize");
        assert_eq!(
            value,
            json!({
                "protocolVersion": "0.2.0",
                "clientInfo": {"name": "bap-client-rust", "version": "0.2.0"},
                "capabilities": {"events": ["page"]}
            })
        );
    }

    #[test]
    fn test_initialize_result_keeps_unknown_capabilities() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "0.2.0",
            "serverInfo": {"name": "bap-server", "version": "1.0.0"},
            "capabilities": {"events": ["page", "console"], "tracing": true}
        }))
        .expect("parse");

        assert!(result.capabilities.supports_event("console"));
        assert!(!result.capabilities.supports_event("download"));
        assert_eq!(result.capabilities.extra.get("tracing"), Some(&json!(true)));
    }

    #[test]
    fn test_approval_decision_wire_names() {
        let params = ApprovalRespondParams {
            request_id: "apr-1".into(),
            decision: ApprovalDecision::ApproveSession,
            reason: None,
        };
        assert_eq!(
            serde_json::to_value(&params).expect("serialize"),
            json!({"requestId": "apr-1", "decision": "approve-session"})
        );
    }

    #[test]
    fn test_shutdown_params() {
        let params = ShutdownParams {
            save_state: Some(false),
            close_pages: Some(true),
        };
        assert_eq!(
            serde_json::to_value(&params).expect("serialize"),
            json!({"saveState": false, "closePages": true})
        );
    }
}
