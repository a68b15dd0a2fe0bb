//! Message channel between the client and a protocol server.
//!
//! A transport moves complete JSON-RPC texts in both directions and reports
//! what happens to the channel. It knows nothing about ids or methods.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Client (Rust)  │    WebSocket  or  POST+SSE   │  Protocol       │
//! │                 │◄────────────────────────────►│  Server         │
//! │  inbound pump   │                              │                 │
//! │  ◄─ TransportEvent                             │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Contract
//!
//! 1. `connect(events)` opens the channel; refusal is [`Error::Connection`]
//! 2. `send(text)` writes one message; fails with [`Error::NotConnected`]
//!    when no channel is open
//! 3. `close()` is idempotent and waits for the I/O task to finish
//! 4. Inbound traffic and lifecycle changes arrive as [`TransportEvent`]s
//!
//! An explicit `close()` never emits [`TransportEvent::Closed`]; only an
//! unexpected termination (or an exhausted reconnect) does.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `reconnect` | Exponential backoff policy and loop |
//! | `sse` | HTTP POST + Server-Sent Events transport |
//! | `websocket` | WebSocket transport and event loop |
//!
//! [`Error::Connection`]: crate::Error::Connection
//! [`Error::NotConnected`]: crate::Error::NotConnected

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Exponential backoff reconnection.
pub mod reconnect;

/// HTTP POST + Server-Sent Events transport.
pub mod sse;

/// WebSocket transport and event loop.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use reconnect::ReconnectPolicy;
pub use sse::SseTransport;
pub use websocket::WebSocketTransport;

// ============================================================================
// Constants
// ============================================================================

/// Query parameter carrying the authentication token.
pub const TOKEN_QUERY_PARAM: &str = "token";

// ============================================================================
// TransportEvent
// ============================================================================

/// Something that happened on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete inbound message.
    Message(String),
    /// Channel terminated unexpectedly and will not come back.
    Closed,
    /// Non-fatal channel error.
    Error(String),
    /// About to sleep before reconnect attempt `attempt` of `max_attempts`.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Configured ceiling.
        max_attempts: u32,
    },
    /// Channel is open again after a reconnect.
    Reconnected,
}

/// Sender half handed to [`Transport::connect`].
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// A bidirectional message channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the channel and starts delivering events to `events`.
    async fn connect(&self, events: EventSender) -> Result<()>;

    /// Writes one complete message.
    async fn send(&self, message: String) -> Result<()>;

    /// Tears the channel down. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    /// Returns `true` while the channel is open.
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Helpers
// ============================================================================

/// Returns `url` with the token appended as a query parameter.
#[must_use]
pub fn with_token(url: &Url, token: Option<&str>) -> Url {
    let mut url = url.clone();
    if let Some(token) = token {
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
    }
    url
}

// ============================================================================
// Tests
// ============================================================================
