//! Client configuration.
//!
//! [`ClientOptions`] is the validated form produced by
//! [`ClientBuilder::build`](super::ClientBuilder::build). Every field has a
//! named default.
//!
//! | Option | Default |
//! |--------|---------|
//! | `url` | `ws://localhost:9222` |
//! | `timeout` | 30 s |
//! | `events` | `page`, `console`, `network`, `dialog` |
//! | `transport` | [`TransportKind::WebSocket`] |
//! | `reconnect` | off |
//! | `protocol_version` | `0.2.0` |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::protocol::handshake::{ClientCapabilities, ClientInfo, InitializeParams};
use crate::protocol::{ProtocolVersion, category};
use crate::transport::{
    ReconnectPolicy, SseTransport, Transport, WebSocketTransport, with_token,
};

// ============================================================================
// Constants
// ============================================================================

/// Default server endpoint.
pub const DEFAULT_URL: &str = "ws://localhost:9222";

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the `shutdown` call during close.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default client name sent in the handshake.
pub const DEFAULT_CLIENT_NAME: &str = env!("CARGO_PKG_NAME");

/// Default client version sent in the handshake.
pub const DEFAULT_CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Event categories subscribed to by default.
pub const DEFAULT_EVENTS: [&str; 4] = [
    category::PAGE,
    category::CONSOLE,
    category::NETWORK,
    category::DIALOG,
];

// ============================================================================
// TransportKind
// ============================================================================

/// Wire transport used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Single WebSocket.
    #[default]
    WebSocket,
    /// HTTP POST for requests, Server-Sent Events for responses.
    Sse,
}

impl TransportKind {
    /// Infers the kind from a URL scheme.
    #[must_use]
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ws" | "wss" => Some(Self::WebSocket),
            "http" | "https" => Some(Self::Sse),
            _ => None,
        }
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Validated client configuration.
#[derive(Clone, PartialEq)]
pub struct ClientOptions {
    /// Server endpoint.
    pub url: Url,

    /// Authentication token, sent as the `token` query parameter.
    pub token: Option<String>,

    /// Client name sent in the handshake.
    pub client_name: String,

    /// Client version sent in the handshake.
    pub client_version: String,

    /// Default per-call timeout.
    pub timeout: Duration,

    /// Event categories to subscribe to after the handshake.
    pub events: Vec<String>,

    /// Wire transport.
    pub transport: TransportKind,

    /// Auto-reconnect policy (WebSocket only).
    pub reconnect: Option<ReconnectPolicy>,

    /// Protocol version announced in the handshake.
    pub protocol_version: ProtocolVersion,

    /// Maximum concurrent pending calls.
    pub max_pending: usize,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("client_name", &self.client_name)
            .field("client_version", &self.client_version)
            .field("timeout", &self.timeout)
            .field("events", &self.events)
            .field("transport", &self.transport)
            .field("reconnect", &self.reconnect)
            .field("protocol_version", &self.protocol_version)
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl ClientOptions {
    /// Endpoint including the token query parameter.
    #[must_use]
    pub fn endpoint(&self) -> Url {
        with_token(&self.url, self.token.as_deref())
    }

    /// Builds the transport these options describe.
    ///
    /// # Errors
    ///
    /// [`Error::Http`](crate::Error::Http) if the SSE HTTP client cannot be built.
    pub fn create_transport(&self) -> Result<Arc<dyn Transport>> {
        let endpoint = self.endpoint();
        let transport: Arc<dyn Transport> = match self.transport {
            TransportKind::WebSocket => {
                let ws = WebSocketTransport::new(endpoint);
                match self.reconnect {
                    Some(policy) => Arc::new(ws.with_reconnect(policy)),
                    None => Arc::new(ws),
                }
            }
            TransportKind::Sse => Arc::new(SseTransport::new(&endpoint)?),
        };
        Ok(transport)
    }

    /// Params of the `initialize` request.
    #[must_use]
    pub fn initialize_params(&self) -> InitializeParams {
        InitializeParams {
            protocol_version: self.protocol_version.to_string(),
            client_info: ClientInfo {
                name: self.client_name.clone(),
                version: self.client_version.clone(),
            },
            capabilities: Some(ClientCapabilities {
                events: Some(self.events.clone()),
                streaming: Some(false),
                compression: Some(false),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
