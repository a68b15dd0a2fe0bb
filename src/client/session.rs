//! Client session: lifecycle, calls and subscriptions.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──handshake ok──► Connected
//!      ▲                           │                           │
//!      └──────── failure ──────────┘          close() / channel lost
//!      ▲                                                       │
//!      └────────────── Closing ◄───────────────────────────────┘
//! ```
//!
//! `connect()` opens the transport, sends `initialize`, checks the server
//! protocol version, records capabilities, acknowledges with
//! `notifications/initialized` and subscribes to the configured events.
//! Any failure closes the transport before the error is returned.
//!
//! `close()` sends a best-effort `shutdown`, fails every pending call with
//! "client closed" and closes the transport.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{PageId, StreamId};
use crate::protocol::handshake::{
    ApprovalRespondParams, ApprovalRespondResult, ShutdownParams, StreamCancelParams,
    StreamCancelResult, SubscribeParams,
};
use crate::protocol::{
    ApprovalDecision, ApprovalRequired, Compatibility, Incoming, InitializeResult,
    ProtocolVersion, ServerCapabilities, ServerInfo, SessionEvent, StreamChunk, StreamEnd,
    category, methods,
};
use crate::transport::{Transport, TransportEvent};

use super::builder::ClientBuilder;
use super::dispatcher::Dispatcher;
use super::options::{ClientOptions, SHUTDOWN_GRACE};
use super::router::{Router, Subscription};
use super::state::{ConnectionState, SessionState};

// ============================================================================
// SessionInfo
// ============================================================================

/// What the handshake established.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Version the server reported.
    pub protocol_version: ProtocolVersion,
    /// Server identification.
    pub server_info: ServerInfo,
    /// Capability snapshot.
    pub capabilities: ServerCapabilities,
    /// Version negotiation outcome.
    pub compatibility: Compatibility,
}

// ============================================================================
// Client
// ============================================================================

/// A protocol session with one server.
///
/// Cheap to clone; clones share the session.
///
/// # Example
///
/// ```no_run
/// use bap_client::{Client, Result};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let client = Client::builder().url("ws://localhost:9222").build()?;
///     let info = client.connect().await?;
///     println!("connected to {}", info.server_info.name);
///
///     let _sub = client.on("console", |event| println!("{}", event.params));
///     let pages = client.call("page/list", json!({})).await?;
///     println!("{pages}");
///
///     client.close().await
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    session: Arc<Mutex<SessionState>>,
    dispatcher: Dispatcher,
    router: Router,
    inbound: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.options.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Construction
// ============================================================================

impl Client {
    /// Returns a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client from validated options, building its transport.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the SSE client cannot be built.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let transport = options.create_transport()?;
        Ok(Self::with_transport(options, transport))
    }

    /// Creates a client over an existing transport.
    #[must_use]
    pub fn with_transport(options: ClientOptions, transport: Arc<dyn Transport>) -> Self {
        let session = Arc::new(Mutex::new(SessionState::default()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&session),
            Arc::clone(&transport),
            options.max_pending,
        );

        Self {
            inner: Arc::new(ClientInner {
                options,
                transport,
                session,
                dispatcher,
                router: Router::new(),
                inbound: Mutex::new(None),
            }),
        }
    }

    /// Configuration in effect.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }
}

// ============================================================================
// Client - Lifecycle
// ============================================================================

impl Client {
    /// Opens the transport and performs the handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] `AlreadyInitialized` unless disconnected
    /// - [`Error::Connection`] if the transport cannot connect
    /// - [`Error::VersionMismatch`] if the server's major version differs
    /// - Any error of the `initialize` or `events/subscribe` calls
    pub async fn connect(&self) -> Result<SessionInfo> {
        {
            let mut session = self.inner.session.lock();
            if session.state != ConnectionState::Disconnected {
                return Err(Error::already_initialized());
            }
            session.begin_connect();
        }

        match self.handshake().await {
            Ok(info) => Ok(info),
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                self.abort_connect().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<SessionInfo> {
        let inner = &self.inner;
        let options = &inner.options;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        inner.transport.connect(events_tx).await?;
        self.spawn_inbound(events_rx);

        let params = serde_json::to_value(options.initialize_params())?;
        let result: InitializeResult = serde_json::from_value(
            inner
                .dispatcher
                .call(methods::INITIALIZE, Some(params), options.timeout)
                .await?,
        )?;

        let server_version: ProtocolVersion = result.protocol_version.parse()?;
        let compatibility = options.protocol_version.negotiate(server_version)?;
        if let Compatibility::Degraded { client, server } = compatibility {
            warn!(
                %client,
                %server,
                "Server protocol minor version is older; some features may be unavailable"
            );
        }

        {
            let mut session = inner.session.lock();
            if session.state != ConnectionState::Connecting {
                return Err(Error::client_closed());
            }
            session.capabilities = Some(result.capabilities.clone());
            session.server_info = Some(result.server_info.clone());
            session.protocol_version = Some(server_version);
            session.state = ConnectionState::Connected;
        }

        inner.dispatcher.notify(methods::INITIALIZED, None).await?;

        if !options.events.is_empty() {
            let params = serde_json::to_value(SubscribeParams {
                events: options.events.clone(),
            })?;
            inner
                .dispatcher
                .call(methods::SUBSCRIBE, Some(params), options.timeout)
                .await?;
        }

        info!(
            server = %result.server_info.name,
            version = %server_version,
            "Session established"
        );

        Ok(SessionInfo {
            protocol_version: server_version,
            server_info: result.server_info,
            capabilities: result.capabilities,
            compatibility,
        })
    }

    /// Undoes a partial connect.
    async fn abort_connect(&self) {
        self.inner.dispatcher.fail_all(Error::client_closed);
        if let Err(e) = self.inner.transport.close().await {
            debug!(error = %e, "Transport close failed during abort");
        }
        self.stop_inbound();
        self.inner.session.lock().reset();
    }

    /// Closes the session. A no-op when already disconnected.
    ///
    /// # Errors
    ///
    /// Errors from closing the transport are logged, not returned; the
    /// `Result` is kept for transports that may report them in the future.
    pub async fn close(&self) -> Result<()> {
        {
            let mut session = self.inner.session.lock();
            match session.state {
                ConnectionState::Disconnected | ConnectionState::Closing => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Connected => {
                    session.state = ConnectionState::Closing;
                }
            }
        }

        if self.inner.transport.is_connected() {
            let params = serde_json::to_value(ShutdownParams {
                save_state: Some(false),
                close_pages: Some(true),
            })?;
            if let Err(e) = self
                .inner
                .dispatcher
                .call(methods::SHUTDOWN, Some(params), SHUTDOWN_GRACE)
                .await
            {
                debug!(error = %e, "Shutdown request ignored");
            }
        }

        let failed = self.inner.dispatcher.fail_all(Error::client_closed);
        if failed > 0 {
            debug!(failed, "Pending calls settled on close");
        }

        if let Err(e) = self.inner.transport.close().await {
            warn!(error = %e, "Transport close failed");
        }
        self.stop_inbound();
        self.inner.session.lock().reset();

        self.inner
            .router
            .emit(&SessionEvent::local(category::CLOSE, json!({ "reason": "client" })));
        info!("Session closed");
        Ok(())
    }

    /// Connects, runs `f`, and always closes afterwards.
    ///
    /// # Errors
    ///
    /// The connect error, otherwise the error returned by `f`.
    pub async fn session<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.connect().await?;
        let result = f(self.clone()).await;
        if let Err(e) = self.close().await {
            warn!(error = %e, "Close after session failed");
        }
        result
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Returns `true` once the handshake has completed and until close.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Capabilities from the last handshake.
    #[must_use]
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.session.lock().capabilities.clone()
    }

    /// Server identification from the last handshake.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.inner.session.lock().server_info.clone()
    }

    /// Protocol version the server reported.
    #[must_use]
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.inner.session.lock().protocol_version
    }

    /// Number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.dispatcher.pending_count()
    }
}

// ============================================================================
// Client - Calls
// ============================================================================

impl Client {
    /// Calls `method` with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] `NotInitialized` before `connect()`
    /// - [`Error::Rpc`] `Timeout` if no response arrived in time
    /// - [`Error::Rpc`] carrying the server's error
    /// - Transport errors from the write
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.inner.options.timeout)
            .await
    }

    /// Calls `method` with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        call_timeout: Duration,
    ) -> Result<Value> {
        self.ensure_connected()?;
        self.inner
            .dispatcher
            .call(method, Some(params), call_timeout)
            .await
    }

    /// Typed call: serializes `params` and deserializes the result.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call); also [`Error::Json`] on (de)serialization failure.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Sends a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// [`Error::Rpc`] `NotInitialized` before `connect()`, or transport errors.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_connected()?;
        self.inner.dispatcher.notify(method, params).await
    }

    /// Cancels an in-progress stream. Returns whether the server cancelled it.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn cancel_stream(&self, stream_id: &StreamId) -> Result<bool> {
        let result: StreamCancelResult = self
            .request(
                methods::STREAM_CANCEL,
                &StreamCancelParams {
                    stream_id: stream_id.clone(),
                },
            )
            .await?;
        Ok(result.cancelled)
    }

    /// Answers an `approval/required` prompt.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn respond_to_approval(
        &self,
        request_id: &str,
        decision: ApprovalDecision,
        reason: Option<&str>,
    ) -> Result<bool> {
        let result: ApprovalRespondResult = self
            .request(
                methods::APPROVAL_RESPOND,
                &ApprovalRespondParams {
                    request_id: request_id.to_string(),
                    decision,
                    reason: reason.map(str::to_string),
                },
            )
            .await?;
        Ok(result.acknowledged)
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            _ => Err(Error::not_initialized()),
        }
    }
}

// ============================================================================
// Client - Active Page
// ============================================================================

impl Client {
    /// Sets the default target page. Cleared on close.
    pub fn set_active_page(&self, page: Option<PageId>) {
        self.inner.session.lock().active_page = page;
    }

    /// Default target page, if set.
    #[must_use]
    pub fn active_page(&self) -> Option<PageId> {
        self.inner.session.lock().active_page.clone()
    }
}

// ============================================================================
// Client - Subscriptions
// ============================================================================

impl Client {
    /// Registers a handler for an event category (`page`, `console`, ...,
    /// plus `close`, `error`, `reconnecting`, `reconnected`).
    pub fn on<F>(&self, category: &str, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.router.on(category, Arc::new(handler))
    }

    /// Registers a `stream/chunk` handler.
    pub fn on_stream_chunk<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamChunk) + Send + Sync + 'static,
    {
        self.inner.router.on_stream_chunk(Arc::new(handler))
    }

    /// Registers a `stream/end` handler.
    pub fn on_stream_end<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamEnd) + Send + Sync + 'static,
    {
        self.inner.router.on_stream_end(Arc::new(handler))
    }

    /// Registers an `approval/required` handler.
    pub fn on_approval_required<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ApprovalRequired) + Send + Sync + 'static,
    {
        self.inner.router.on_approval_required(Arc::new(handler))
    }
}

// ============================================================================
// Client - Inbound Task
// ============================================================================

impl Client {
    fn spawn_inbound(&self, events_rx: mpsc::UnboundedReceiver<TransportEvent>) {
        let task = tokio::spawn(run_inbound(
            events_rx,
            self.inner.dispatcher.clone(),
            self.inner.router.clone(),
            Arc::clone(&self.inner.session),
        ));
        if let Some(previous) = self.inner.inbound.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_inbound(&self) {
        if let Some(task) = self.inner.inbound.lock().take() {
            task.abort();
        }
    }
}

/// Processes transport events in delivery order.
async fn run_inbound(
    mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    dispatcher: Dispatcher,
    router: Router,
    session: Arc<Mutex<SessionState>>,
) {
    while let Some(event) = events_rx.recv().await {
        match event {
            TransportEvent::Message(text) => match Incoming::parse(&text) {
                Ok(Incoming::Response(response)) => dispatcher.settle(response),
                Ok(Incoming::Notification(notification)) => router.dispatch(notification),
                Ok(Incoming::Request(request)) => dispatcher.reject_server_request(&request).await,
                Err(e) => warn!(error = %e, "Dropping malformed message"),
            },

            TransportEvent::Closed => {
                warn!("Connection lost");
                dispatcher.fail_all(|| Error::ConnectionClosed);
                session.lock().reset();
                router.emit(&SessionEvent::local(category::CLOSE, json!({ "reason": "remote" })));
            }

            TransportEvent::Error(message) => {
                router.emit(&SessionEvent::local(category::ERROR, json!({ "message": message })));
            }

            TransportEvent::Reconnecting {
                attempt,
                max_attempts,
            } => {
                router.emit(&SessionEvent::local(
                    category::RECONNECTING,
                    json!({ "attempt": attempt, "maxAttempts": max_attempts }),
                ));
            }

            TransportEvent::Reconnected => {
                router.emit(&SessionEvent::local(category::RECONNECTED, Value::Null));
            }
        }
    }

    debug!("Inbound task terminated");
}

// ============================================================================
// Tests
// ============================================================================
