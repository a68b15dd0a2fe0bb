//! Synchronous facade over [`Client`].
//!
//! Owns a multi-threaded Tokio runtime and drives every async operation with
//! `block_on`. Handlers still run on the runtime's worker threads, so they
//! must be `Send + Sync`.
//!
//! Do not use from inside an async context: `block_on` panics when called
//! on a runtime thread.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use crate::error::Result;
use crate::identifiers::{PageId, StreamId};
use crate::protocol::{
    ApprovalDecision, ApprovalRequired, ServerCapabilities, SessionEvent, StreamChunk, StreamEnd,
};

use super::builder::ClientBuilder;
use super::session::{Client, SessionInfo};
use super::router::Subscription;
use super::state::ConnectionState;

// ============================================================================
// BlockingClient
// ============================================================================

/// Blocking client. Closes the session on drop.
pub struct BlockingClient {
    runtime: Runtime,
    client: Client,
}

impl BlockingClient {
    /// Builds the client and its runtime.
    ///
    /// # Errors
    ///
    /// Builder validation errors, or [`Error::Io`](crate::Error::Io) if the
    /// runtime cannot start.
    pub fn new(builder: ClientBuilder) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bap-client")
            .enable_all()
            .build()?;
        let client = builder.build()?;
        Ok(Self { runtime, client })
    }

    /// Wraps an existing async client with a dedicated runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Io`](crate::Error::Io) if the runtime cannot start.
    pub fn from_client(client: Client) -> Result<Self> {
        let runtime = Builder::new_multi_thread().enable_all().build()?;
        Ok(Self { runtime, client })
    }

    /// The async client behind this facade.
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// See [`Client::connect`].
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub fn connect(&self) -> Result<SessionInfo> {
        self.runtime.block_on(self.client.connect())
    }

    /// See [`Client::close`].
    ///
    /// # Errors
    ///
    /// See [`Client::close`].
    pub fn close(&self) -> Result<()> {
        self.runtime.block_on(self.client.close())
    }

    /// See [`Client::call`].
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.runtime.block_on(self.client.call(method, params))
    }

    /// See [`Client::call_with_timeout`].
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        call_timeout: Duration,
    ) -> Result<Value> {
        self.runtime
            .block_on(self.client.call_with_timeout(method, params, call_timeout))
    }

    /// See [`Client::request`].
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.runtime.block_on(self.client.request(method, params))
    }

    /// See [`Client::notify`].
    ///
    /// # Errors
    ///
    /// See [`Client::notify`].
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.runtime.block_on(self.client.notify(method, params))
    }

    /// See [`Client::cancel_stream`].
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn cancel_stream(&self, stream_id: &StreamId) -> Result<bool> {
        self.runtime.block_on(self.client.cancel_stream(stream_id))
    }

    /// See [`Client::respond_to_approval`].
    ///
    /// # Errors
    ///
    /// See [`Client::call`].
    pub fn respond_to_approval(
        &self,
        request_id: &str,
        decision: ApprovalDecision,
        reason: Option<&str>,
    ) -> Result<bool> {
        self.runtime
            .block_on(self.client.respond_to_approval(request_id, decision, reason))
    }

    /// See [`Client::on`].
    pub fn on<F>(&self, category: &str, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.client.on(category, handler)
    }

    /// See [`Client::on_stream_chunk`].
    pub fn on_stream_chunk<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamChunk) + Send + Sync + 'static,
    {
        self.client.on_stream_chunk(handler)
    }

    /// See [`Client::on_stream_end`].
    pub fn on_stream_end<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamEnd) + Send + Sync + 'static,
    {
        self.client.on_stream_end(handler)
    }

    /// See [`Client::on_approval_required`].
    pub fn on_approval_required<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ApprovalRequired) + Send + Sync + 'static,
    {
        self.client.on_approval_required(handler)
    }

    /// See [`Client::set_active_page`].
    pub fn set_active_page(&self, page: Option<PageId>) {
        self.client.set_active_page(page);
    }

    /// See [`Client::active_page`].
    #[must_use]
    pub fn active_page(&self) -> Option<PageId> {
        self.client.active_page()
    }

    /// See [`Client::state`].
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// See [`Client::is_connected`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// See [`Client::capabilities`].
    #[must_use]
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.client.capabilities()
    }
}

// ============================================================================
// BlockingClient - Drop
// ============================================================================

impl Drop for BlockingClient {
    fn drop(&mut self) {
        if self.client.state() == ConnectionState::Disconnected {
            return;
        }
        if let Err(e) = self.runtime.block_on(self.client.close()) {
            warn!(error = %e, "Close on drop failed");
        }
    }
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener as StdListener;
    use std::sync::Arc;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    use crate::client::testing::MockTransport;
    use crate::protocol::ErrorKind;

    /// Minimal BAP server answering the handshake and echoing calls.
    async fn serve_one(listener: TcpListener) {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let request: Value = serde_json::from_str(&text).expect("json");
            let Some(id) = request.get("id").cloned() else {
                continue;
            };
            let result = match request["method"].as_str() {
                Some("initialize") => json!({
                    "protocolVersion": "0.2.0",
                    "serverInfo": {"name": "loopback", "version": "1.0.0"},
                    "capabilities": {"events": ["page"]}
                }),
                _ => json!({"echo": request["params"]}),
            };
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                break;
            }
        }
    }

    #[test]
    fn test_blocking_round_trip_over_websocket() {
        let std_listener = StdListener::bind("127.0.0.1:0").expect("bind");
        std_listener.set_nonblocking(true).expect("nonblocking");
        let addr = std_listener.local_addr().expect("addr");

        let client = BlockingClient::new(
            Client::builder()
                .url(format!("ws://{addr}"))
                .events(Vec::<String>::new()),
        )
        .expect("build");

        let server_rt = tokio::runtime::Runtime::new().expect("server runtime");
        let listener = {
            let _guard = server_rt.enter();
            TcpListener::from_std(std_listener).expect("listener")
        };
        server_rt.spawn(serve_one(listener));

        let info = client.connect().expect("connect");
        assert_eq!(info.server_info.name, "loopback");
        assert!(client.is_connected());

        let result = client.call("page/list", json!({"n": 1})).expect("call");
        assert_eq!(result, json!({"echo": {"n": 1}}));

        client.close().expect("close");
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_call_before_connect_fails() {
        let transport = Arc::new(MockTransport::new());
        let client = BlockingClient::new(Client::builder().transport(transport)).expect("build");

        let err = client.call("page/list", json!({})).expect_err("not connected");
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn test_drop_when_disconnected_does_not_touch_transport() {
        let transport = Arc::new(MockTransport::new());
        let client =
            BlockingClient::new(Client::builder().transport(transport.clone())).expect("build");
        drop(client);
        assert_eq!(transport.close_count(), 0);
    }
}
