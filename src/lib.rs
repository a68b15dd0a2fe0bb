//! Browser Agent Protocol client engine.
//!
//! This library implements the client side of the Browser Agent Protocol
//! (BAP): JSON-RPC 2.0 sessions with a browser automation server over a
//! WebSocket or over HTTP POST plus Server-Sent Events.
//!
//! # Architecture
//!
//! - **Transport**: moves text frames. [`WebSocketTransport`] (optional
//!   auto-reconnect) or [`SseTransport`].
//! - **Dispatcher**: assigns request ids, correlates responses, enforces
//!   timeouts and the pending-call limit.
//! - **Router**: classifies notifications (`stream/chunk`, `stream/end`,
//!   `approval/required`, `event/<category>`) and fans them out to handlers.
//! - **Client**: lifecycle (`connect` handshake, `close`) on top of both.
//!
//! Every call settles exactly once: with the server's result, a mapped
//! [`ProtocolError`], a timeout, or "client closed".
//!
//! # Quick Start
//!
//! ```no_run
//! use bap_client::{Client, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .url("ws://localhost:9222")
//!         .token("secret")
//!         .build()?;
//!
//!     let info = client.connect().await?;
//!     println!("server: {} {}", info.server_info.name, info.protocol_version);
//!
//!     let _console = client.on("console", |event| println!("{}", event.params));
//!
//!     let page = client
//!         .call("page/create", json!({"url": "https://example.com"}))
//!         .await?;
//!     println!("{page}");
//!
//!     client.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`], [`ClientBuilder`], [`BlockingClient`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Request ids and type-safe ID wrappers |
//! | [`protocol`] | Wire envelopes, error codes, notification payloads |
//! | [`transport`] | WebSocket and SSE transports |

// ============================================================================
// Modules
// ============================================================================

/// Session client.
///
/// Use [`Client::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Request ids and type-safe identifiers.
pub mod identifiers;

/// JSON-RPC protocol message types.
pub mod protocol;

/// Wire transports.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    BlockingClient, Client, ClientBuilder, ClientOptions, ConnectionState, SessionInfo,
    Subscription, TransportKind,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{HandlerId, PageId, RequestId, StreamId};

// Protocol types
pub use protocol::{
    ApprovalDecision, ApprovalRequired, Compatibility, ErrorKind, ParsedEvent, ProtocolError,
    ProtocolVersion, ServerCapabilities, ServerInfo, SessionEvent, StreamChunk, StreamEnd,
};

// Transport types
pub use transport::{ReconnectPolicy, SseTransport, Transport, TransportEvent, WebSocketTransport};
