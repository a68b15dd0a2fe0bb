//! Server-pushed notification types.
//!
//! Notifications are classified by method name:
//!
//! | Method | Kind | Payload |
//! |--------|------|---------|
//! | `stream/chunk` | [`NotificationKind::StreamChunk`] | [`StreamChunk`] |
//! | `stream/end` | [`NotificationKind::StreamEnd`] | [`StreamEnd`] |
//! | `approval/required` | [`NotificationKind::ApprovalRequired`] | [`ApprovalRequired`] |
//! | `event/<category>` or anything else | [`NotificationKind::Event`] | [`SessionEvent`] |

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{PageId, StreamId};

// ============================================================================
// Method Names
// ============================================================================

/// Stream chunk notification.
pub const STREAM_CHUNK: &str = "stream/chunk";

/// Stream end notification.
pub const STREAM_END: &str = "stream/end";

/// Human approval prompt.
pub const APPROVAL_REQUIRED: &str = "approval/required";

/// Namespace prefix for session events.
pub const EVENT_PREFIX: &str = "event/";

/// Well-known session event categories.
pub mod category {
    /// Page lifecycle.
    pub const PAGE: &str = "page";
    /// Console output.
    pub const CONSOLE: &str = "console";
    /// Network activity.
    pub const NETWORK: &str = "network";
    /// JavaScript dialogs.
    pub const DIALOG: &str = "dialog";
    /// Downloads.
    pub const DOWNLOAD: &str = "download";
    /// Transport closed.
    pub const CLOSE: &str = "close";
    /// Transport error.
    pub const ERROR: &str = "error";
    /// Reconnect attempt starting.
    pub const RECONNECTING: &str = "reconnecting";
    /// Reconnect succeeded.
    pub const RECONNECTED: &str = "reconnected";
}

// ============================================================================
// NotificationKind
// ============================================================================

/// Routing class of a notification method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind<'a> {
    /// `stream/chunk`.
    StreamChunk,
    /// `stream/end`.
    StreamEnd,
    /// `approval/required`.
    ApprovalRequired,
    /// Any other method; `category` has the `event/` prefix stripped.
    Event {
        /// Registry key.
        category: &'a str,
    },
}

impl<'a> NotificationKind<'a> {
    /// Classifies a notification method name.
    ///
    /// # Example
    ///
    /// ```
    /// use bap_client::protocol::NotificationKind;
    ///
    /// assert_eq!(
    ///     NotificationKind::classify("event/console"),
    ///     NotificationKind::Event { category: "console" }
    /// );
    /// assert_eq!(NotificationKind::classify("stream/chunk"), NotificationKind::StreamChunk);
    /// ```
    #[must_use]
    pub fn classify(method: &'a str) -> Self {
        match method {
            STREAM_CHUNK => Self::StreamChunk,
            STREAM_END => Self::StreamEnd,
            APPROVAL_REQUIRED => Self::ApprovalRequired,
            other => {
                let category = match other.strip_prefix(EVENT_PREFIX) {
                    Some(rest) => rest.split('/').next().unwrap_or_default(),
                    None => other,
                };
                Self::Event { category }
            }
        }
    }
}

// ============================================================================
// Stream Payloads
// ============================================================================

/// Params of a `stream/chunk` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    /// Stream this chunk belongs to.
    pub stream_id: StreamId,
    /// Zero-based chunk index.
    pub index: u64,
    /// Chunk payload (base64 for binary streams).
    pub data: String,
    /// Byte offset within the stream.
    pub offset: u64,
    /// Chunk size in bytes.
    pub size: u64,
}

impl StreamChunk {
    /// Decodes a base64 chunk payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `data` is not valid base64.
    pub fn decode_data(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| Error::protocol(format!("invalid base64 in stream chunk: {e}")))
    }
}

/// Params of a `stream/end` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnd {
    /// Finished stream.
    pub stream_id: StreamId,
    /// Number of chunks sent.
    pub total_chunks: u64,
    /// Total size in bytes.
    pub total_size: u64,
    /// Optional integrity checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

// ============================================================================
// Approval Payloads
// ============================================================================

/// Element bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Element the pending action targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalElementInfo {
    /// Accessible role.
    pub role: String,
    /// Accessible name.
    pub name: String,
    /// On-screen bounds.
    pub bounds: BoundingBox,
}

/// Page context shown to the approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalContext {
    pub page_url: String,
    pub page_title: String,
    /// Base64 screenshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_info: Option<ApprovalElementInfo>,
}

/// Params of an `approval/required` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequired {
    /// Id to pass back in `approval/respond`.
    pub request_id: String,
    /// The call awaiting approval.
    pub original_request: Value,
    /// Policy rule that triggered the prompt.
    pub rule: String,
    pub context: ApprovalContext,
    /// Expiry as epoch milliseconds.
    pub expires_at: u64,
}

// ============================================================================
// SessionEvent
// ============================================================================

/// A general session event delivered to category handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Registry key (`page`, `console`, `close`, ...).
    pub category: String,
    /// Original method name (empty for locally raised events).
    pub method: String,
    /// Event payload.
    pub params: Value,
}

impl SessionEvent {
    /// Creates an event raised by the client itself (close, error, reconnect).
    #[must_use]
    pub fn local(category: &str, params: Value) -> Self {
        Self {
            category: category.to_string(),
            method: String::new(),
            params,
        }
    }

    /// Parses the payload into a typed variant based on the category.
    ///
    /// Payloads that do not match the expected shape yield
    /// [`ParsedEvent::Other`].
    #[must_use]
    pub fn parse(&self) -> ParsedEvent {
        let params = self.params.clone();
        let parsed = match self.category.as_str() {
            category::PAGE => serde_json::from_value(params).map(ParsedEvent::Page),
            category::CONSOLE => serde_json::from_value(params).map(ParsedEvent::Console),
            category::NETWORK => serde_json::from_value(params).map(ParsedEvent::Network),
            category::DIALOG => serde_json::from_value(params).map(ParsedEvent::Dialog),
            category::DOWNLOAD => serde_json::from_value(params).map(ParsedEvent::Download),
            _ => return ParsedEvent::Other(self.clone()),
        };
        parsed.unwrap_or_else(|_| ParsedEvent::Other(self.clone()))
    }
}

// ============================================================================
// Typed Events
// ============================================================================

/// Parsed event types for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Page(PageEvent),
    Console(ConsoleEvent),
    Network(NetworkEvent),
    Dialog(DialogEvent),
    Download(DownloadEvent),
    /// Unknown category or unexpected payload.
    Other(SessionEvent),
}

/// Page lifecycle event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEvent {
    pub event: PageEventType,
    pub page_id: PageId,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub timestamp: u64,
}

/// Page lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageEventType {
    Load,
    Domcontentloaded,
    Navigated,
    Error,
    Close,
}

/// Console message event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEvent {
    pub level: ConsoleLevel,
    pub text: String,
    pub page_id: PageId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    pub timestamp: u64,
}

/// Console levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warn,
    Error,
}

/// Network activity event.
///
/// Request/response/failure details are left as raw JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub event: NetworkEventType,
    pub page_id: PageId,
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub failed: Option<Value>,
    pub timestamp: u64,
}

/// Network event stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkEventType {
    Request,
    Response,
    Failed,
}

/// Dialog opened event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogEvent {
    pub dialog_type: DialogType,
    pub message: String,
    #[serde(default)]
    pub default_value: Option<String>,
    pub page_id: PageId,
    pub timestamp: u64,
}

/// Dialog kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogType {
    Alert,
    Confirm,
    Prompt,
    Beforeunload,
}

/// Download progress event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEvent {
    pub download_id: String,
    pub url: String,
    pub suggested_filename: String,
    pub state: DownloadState,
    #[serde(default)]
    pub received_bytes: Option<u64>,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    pub page_id: PageId,
    pub timestamp: u64,
}

/// Download states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Started,
    Progress,
    Completed,
    Canceled,
    Failed,
}

// ============================================================================
// Tests
// ============================================================================
