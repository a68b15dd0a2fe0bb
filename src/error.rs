//! Error types for the protocol client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bap_client::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let result = client.call("page/list", serde_json::json!({})).await?;
//!     println!("{result}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Connection`], [`Error::NotConnected`], [`Error::ConnectionClosed`], [`Error::ReconnectFailed`] |
//! | Protocol | [`Error::Protocol`], [`Error::VersionMismatch`] |
//! | Application | [`Error::Rpc`] (server errors, timeouts, client closed) |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |
//!
//! Every variant exposes a stable numeric [`Error::code`], a retry flag and
//! optional structured details.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::protocol::error::{ErrorKind, ProtocolError, codes};
use crate::protocol::handshake::ProtocolVersion;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Constants
// ============================================================================

/// Suggested retry delay after a failed connection attempt.
const CONNECTION_RETRY_AFTER: Duration = Duration::from_millis(1000);

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Channel could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Send attempted without an open channel.
    #[error("Transport not connected")]
    NotConnected,

    /// Channel terminated while the operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Auto-reconnect gave up.
    #[error("Failed to reconnect after {attempts} attempts")]
    ReconnectFailed {
        /// Attempts made before giving up.
        attempts: u32,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Server speaks an incompatible major protocol version.
    #[error("Protocol version mismatch: client={client}, server={server}. Major version must match.")]
    VersionMismatch {
        /// Client protocol version.
        client: ProtocolVersion,
        /// Server protocol version.
        server: ProtocolVersion,
    },

    // ========================================================================
    // Application Errors
    // ========================================================================
    /// Typed error from the server, or a locally raised call failure.
    #[error(transparent)]
    Rpc(#[from] ProtocolError),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP error (SSE transport).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a version mismatch error.
    #[inline]
    pub fn version_mismatch(client: ProtocolVersion, server: ProtocolVersion) -> Self {
        Self::VersionMismatch { client, server }
    }

    /// Creates a call timeout error tagged with the method name.
    #[inline]
    pub fn timeout(method: &str, timeout: Duration) -> Self {
        Self::Rpc(ProtocolError::timeout(method, timeout))
    }

    /// Creates the error every pending call receives on local close.
    #[inline]
    pub fn client_closed() -> Self {
        Self::Rpc(ProtocolError::client_closed())
    }

    /// Creates the error for calls issued before the handshake.
    #[inline]
    pub fn not_initialized() -> Self {
        Self::Rpc(ProtocolError::not_initialized())
    }

    /// Creates the error for a second `connect()`.
    #[inline]
    pub fn already_initialized() -> Self {
        Self::Rpc(ProtocolError::already_initialized())
    }
}

// ============================================================================
// Error Accessors
// ============================================================================

impl Error {
    /// Stable numeric code.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::Rpc(e) => e.code(),
            Self::VersionMismatch { .. } => codes::INVALID_REQUEST,
            Self::Config { .. } | Self::Url(_) => codes::INVALID_PARAMS,
            Self::Json(_) | Self::Protocol { .. } => codes::PARSE_ERROR,
            Self::Connection { .. }
            | Self::NotConnected
            | Self::ConnectionClosed
            | Self::ReconnectFailed { .. }
            | Self::Io(_)
            | Self::WebSocket(_)
            | Self::Http(_) => codes::SERVER_ERROR,
        }
    }

    /// Typed kind derived from the code.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rpc(e) => e.kind(),
            other => ErrorKind::from_code(other.code()),
        }
    }

    /// Returns `true` if the same operation may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc(e) => e.is_retryable(),
            Self::Connection { .. } | Self::WebSocket(_) | Self::Http(_) => true,
            _ => false,
        }
    }

    /// Suggested delay before retrying.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Rpc(e) => e.retry_after(),
            Self::Connection { .. } => Some(CONNECTION_RETRY_AFTER),
            _ => None,
        }
    }

    /// Structured details, if any.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Rpc(e) => e.details(),
            _ => None,
        }
    }

    /// Returns the inner protocol error, if this is one.
    #[inline]
    #[must_use]
    pub fn as_protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Self::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a call timeout.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Rpc(e) if e.kind() == ErrorKind::Timeout)
    }

    /// Returns `true` if the call failed because the session or channel closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::ConnectionClosed | Self::ReconnectFailed { .. } => true,
            Self::Rpc(e) => *e == ProtocolError::client_closed(),
            _ => false,
        }
    }

    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::NotConnected
                | Self::ConnectionClosed
                | Self::ReconnectFailed { .. }
                | Self::WebSocket(_)
                | Self::Http(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
