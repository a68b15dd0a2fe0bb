//! JSON-RPC protocol message types.
//!
//! This module defines the wire format between the client (Rust) and a
//! Browser Agent Protocol server.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Server | Call with correlation id |
//! | `Response` | Server → Client | Result or error for a call |
//! | `Notification` | Both | Fire-and-forget message (events, streams, approvals) |
//!
//! # Method Naming
//!
//! Methods follow `namespace/name` format:
//!
//! - `initialize`, `shutdown`
//! - `events/subscribe`
//! - `stream/chunk`, `approval/required`, `event/page`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `error` | Error codes and the code → typed error mapper |
//! | `event` | Notification classification and payloads |
//! | `handshake` | Lifecycle payloads and version negotiation |
//! | `message` | Request / Response / Notification envelopes |

// ============================================================================
// Submodules
// ============================================================================

/// Error codes and typed protocol errors.
pub mod error;

/// Notification payload types.
pub mod event;

/// Handshake, shutdown, stream and approval payloads.
pub mod handshake;

/// JSON-RPC envelopes.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{ErrorKind, ProtocolError, codes, map_error};
pub use event::{
    ApprovalContext, ApprovalElementInfo, ApprovalRequired, BoundingBox, ConsoleEvent,
    ConsoleLevel, DialogEvent, DialogType, DownloadEvent, DownloadState, NetworkEvent,
    NetworkEventType, NotificationKind, PageEvent, PageEventType, ParsedEvent, SessionEvent,
    StreamChunk, StreamEnd, category,
};
pub use handshake::{
    ApprovalDecision, ApprovalRespondParams, ApprovalRespondResult, ClientCapabilities,
    ClientInfo, Compatibility, InitializeParams, InitializeResult, PROTOCOL_VERSION,
    ProtocolVersion, ServerCapabilities, ServerInfo, ShutdownParams, StreamCancelParams,
    StreamCancelResult, SubscribeParams, methods,
};
pub use message::{ErrorData, Incoming, JSONRPC_VERSION, Notification, Request, Response, RpcError};
