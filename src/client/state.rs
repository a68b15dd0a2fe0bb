//! Shared session state.
//!
//! Everything the dispatcher and the lifecycle mutate lives in one
//! [`SessionState`] behind a single `parking_lot::Mutex`, so a response,
//! a timeout and a close can never disagree about a pending call.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::identifiers::{PageId, RequestId, RequestIdSequence};
use crate::protocol::{ProtocolVersion, ServerCapabilities, ServerInfo};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a session.
///
/// ```text
/// Disconnected → Connecting → Connected → Closing → Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No channel, no handshake.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake completed.
    Connected,
    /// Close in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// An outstanding request awaiting settlement.
pub(crate) struct PendingCall {
    /// Method name, for diagnostics.
    pub method: String,
    /// Completion handle. Consumed by whichever side settles first.
    pub tx: oneshot::Sender<Result<Value>>,
}

// ============================================================================
// SessionState
// ============================================================================

/// Mutable state of one session.
#[derive(Default)]
pub(crate) struct SessionState {
    pub state: ConnectionState,
    pub ids: RequestIdSequence,
    pub pending: FxHashMap<RequestId, PendingCall>,
    pub capabilities: Option<ServerCapabilities>,
    pub server_info: Option<ServerInfo>,
    pub protocol_version: Option<ProtocolVersion>,
    pub active_page: Option<PageId>,
}

impl SessionState {
    /// Prepares for a fresh connection: ids restart at 1.
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.ids = RequestIdSequence::new();
    }

    /// Drops everything learned from the last handshake.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.capabilities = None;
        self.server_info = None;
        self.protocol_version = None;
        self.active_page = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
