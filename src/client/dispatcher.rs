//! Request/response correlation.
//!
//! Each call allocates the next id, registers a [`PendingCall`], writes the
//! request and waits for the matching response or its timeout.
//!
//! # Settlement
//!
//! A pending call is settled exactly once, by whichever comes first:
//!
//! | Trigger | Outcome |
//! |---------|---------|
//! | Matching response | result, or mapped error |
//! | Timeout | retryable `Timeout` error tagged with the method |
//! | Send failure | the transport error |
//! | Caller drops the future | entry removed, nothing settled |
//! | Close / channel loss | "client closed" / connection closed |
//!
//! Completion handles are fired while the session lock is held, so the
//! timeout path can tell a lost race from a real timeout.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::message::error_envelope;
use crate::protocol::{Notification, ProtocolError, Request, Response};
use crate::transport::Transport;

use super::state::{PendingCall, SessionState};

// ============================================================================
// Constants
// ============================================================================

/// Maximum pending requests before rejecting new ones.
pub const DEFAULT_MAX_PENDING: usize = 1024;

// ============================================================================
// Dispatcher
// ============================================================================

/// Correlates requests with responses over a [`Transport`].
#[derive(Clone)]
pub(crate) struct Dispatcher {
    session: Arc<Mutex<SessionState>>,
    transport: Arc<dyn Transport>,
    max_pending: usize,
}

impl Dispatcher {
    pub fn new(
        session: Arc<Mutex<SessionState>>,
        transport: Arc<dyn Transport>,
        max_pending: usize,
    ) -> Self {
        Self {
            session,
            transport,
            max_pending,
        }
    }

    /// Sends a request and waits up to `call_timeout` for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if too many calls are pending
    /// - Any transport error from the write
    /// - [`Error::Rpc`] with kind `Timeout` if no response arrived in time
    /// - [`Error::Rpc`] carrying the server's error
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        call_timeout: Duration,
    ) -> Result<Value> {
        let (request_id, mut response_rx) = self.register(method)?;
        // Removes the entry however this future ends, including when dropped.
        let _guard = PendingGuard {
            session: &self.session,
            id: &request_id,
        };

        self.send_request(&request_id, method, params).await?;

        match timeout(call_timeout, &mut response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let removed = self.session.lock().pending.remove(&request_id);
                if removed.is_some() {
                    debug!(%request_id, method, "Request timed out");
                    return Err(Error::timeout(method, call_timeout));
                }

                // A response settled the call before the timer could remove it.
                response_rx
                    .try_recv()
                    .unwrap_or_else(|_| Err(Error::timeout(method, call_timeout)))
            }
        }
    }

    /// Allocates an id and registers the pending call.
    fn register(&self, method: &str) -> Result<(RequestId, oneshot::Receiver<Result<Value>>)> {
        let (response_tx, response_rx) = oneshot::channel();
        let mut session = self.session.lock();

        if session.pending.len() >= self.max_pending {
            warn!(
                pending = session.pending.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(Error::protocol(format!(
                "Too many pending requests: {}/{}",
                session.pending.len(),
                self.max_pending
            )));
        }

        let request_id = session.ids.next_id();
        session.pending.insert(
            request_id.clone(),
            PendingCall {
                method: method.to_string(),
                tx: response_tx,
            },
        );
        Ok((request_id, response_rx))
    }

    /// Writes a registered request.
    async fn send_request(
        &self,
        request_id: &RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<()> {
        let request = Request::new(request_id.clone(), method, params);
        let sent = match serde_json::to_string(&request) {
            Ok(text) => self.transport.send(text).await,
            Err(e) => Err(Error::Json(e)),
        };

        match sent {
            Ok(()) => {
                trace!(%request_id, method, "Request sent");
                Ok(())
            }
            Err(e) => {
                debug!(%request_id, method, error = %e, "Request send failed");
                Err(e)
            }
        }
    }

    /// Sends a notification. Nothing is tracked.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let text = serde_json::to_string(&Notification::new(method, params))?;
        self.transport.send(text).await
    }

    /// Settles the pending call matching `response`.
    ///
    /// Responses for unknown ids (already settled, timed out, or never
    /// issued) are logged and dropped.
    pub fn settle(&self, response: Response) {
        let mut session = self.session.lock();
        match session.pending.remove(&response.id) {
            Some(call) => {
                trace!(id = %response.id, method = %call.method, "Response received");
                let _ = call.tx.send(response.outcome.map_err(Error::Rpc));
            }
            None => warn!(id = %response.id, "Response for unknown request"),
        }
    }

    /// Settles every pending call with an error built by `make_error`.
    ///
    /// Returns the number of calls failed.
    pub fn fail_all(&self, make_error: impl Fn() -> Error) -> usize {
        let mut session = self.session.lock();
        let count = session.pending.len();
        for (_, call) in session.pending.drain() {
            let _ = call.tx.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed pending requests");
        }
        count
    }

    /// Answers a server-initiated request. The client exposes no methods.
    pub async fn reject_server_request(&self, request: &Request) {
        debug!(id = %request.id, method = %request.method, "Rejecting server request");
        let error = ProtocolError::method_not_found(&request.method).to_wire();
        let reply = error_envelope(&request.id, &error).to_string();
        if let Err(e) = self.transport.send(reply).await {
            warn!(error = %e, "Failed to reject server request");
        }
    }

    /// Number of outstanding calls.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.session.lock().pending.len()
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Drops the pending entry of a call that ends without settling.
///
/// Removal is idempotent: an entry already taken by a response, the
/// timeout path or `fail_all` is simply gone.
struct PendingGuard<'a> {
    session: &'a Mutex<SessionState>,
    id: &'a RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.session.lock().pending.remove(self.id).is_some() {
            trace!(request_id = %self.id, "Abandoned request removed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use serde_json::json;

    use crate::client::testing::MockTransport;
    use crate::protocol::{ErrorKind, Incoming};

    fn dispatcher(max_pending: usize) -> (Dispatcher, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::connected());
        let session = Arc::new(Mutex::new(SessionState::default()));
        let dispatcher = Dispatcher::new(session, transport.clone(), max_pending);
        (dispatcher, transport)
    }

    fn response(id: u64, outcome: std::result::Result<Value, ProtocolError>) -> Response {
        Response {
            id: RequestId::Number(id),
            outcome,
        }
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .call("page/list", Some(json!({})), Duration::from_secs(5))
                    .await
            })
        };

        let sent = transport.next_sent().await;
        assert_eq!(sent["jsonrpc"], "2.0");
        assert_eq!(sent["id"], 1);
        assert_eq!(sent["method"], "page/list");

        dispatcher.settle(response(1, Ok(json!({"pages": []}))));
        let result = call.await.expect("join").expect("result");
        assert_eq!(result, json!({"pages": []}));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_call_maps_error_response() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.call("page/navigate", None, Duration::from_secs(5)).await
            })
        };

        let _ = transport.next_sent().await;
        dispatcher.settle(response(1, Err(ProtocolError::page_not_found("p9"))));

        let err = call.await.expect("join").expect_err("error");
        assert_eq!(err.kind(), ErrorKind::PageNotFound);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_second_response_for_same_id_is_noop() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.call("m", None, Duration::from_secs(5)).await })
        };

        let _ = transport.next_sent().await;
        dispatcher.settle(response(1, Ok(json!("first"))));
        dispatcher.settle(response(1, Ok(json!("second"))));
        dispatcher.settle(response(1, Err(ProtocolError::client_closed())));

        assert_eq!(call.await.expect("join").expect("ok"), json!("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_retryable_and_discards_late_response() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);

        let started = tokio::time::Instant::now();
        let err = dispatcher
            .call("page/navigate", None, Duration::from_millis(250))
            .await
            .expect_err("timeout");

        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("page/navigate"));
        assert_eq!(dispatcher.pending_count(), 0);

        let _ = transport.next_sent().await;
        dispatcher.settle(response(1, Ok(json!("late"))));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_calls_release_their_slots() {
        let (dispatcher, transport) = dispatcher(2);

        for _ in 0..2 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(10),
                dispatcher.call("page/wait", None, Duration::from_secs(30)),
            )
            .await;
            assert!(abandoned.is_err(), "outer timeout fires first");
        }
        assert_eq!(dispatcher.pending_count(), 0);

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.call("m", None, Duration::from_secs(5)).await })
        };
        for _ in 0..2 {
            let _ = transport.next_sent().await;
        }
        let sent = transport.next_sent().await;
        assert_eq!(sent["id"], 3);

        dispatcher.settle(response(3, Ok(json!("ok"))));
        assert_eq!(call.await.expect("join").expect("third call"), json!("ok"));
    }

    #[tokio::test]
    async fn test_aborted_task_releases_its_slot() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);

        let call = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.call("m", None, Duration::from_secs(30)).await })
        };
        let _ = transport.next_sent().await;
        assert_eq!(dispatcher.pending_count(), 1);

        call.abort();
        assert!(call.await.expect_err("aborted").is_cancelled());
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_removes_pending_entry() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);
        transport.fail_sends(true);

        let err = dispatcher
            .call("m", None, Duration::from_secs(5))
            .await
            .expect_err("send fails");
        assert!(err.is_connection_error());
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_settles_every_call() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);

        let calls: Vec<_> = (0..5)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .call(&format!("m{i}"), None, Duration::from_secs(60))
                        .await
                })
            })
            .collect();

        for _ in 0..5 {
            let _ = transport.next_sent().await;
        }
        assert_eq!(dispatcher.pending_count(), 5);

        assert_eq!(dispatcher.fail_all(Error::client_closed), 5);
        for call in calls {
            let err = call.await.expect("join").expect_err("closed");
            assert!(err.is_closed());
            assert!(!err.is_retryable());
        }
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_ids_are_unique_and_increasing() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);

        for _ in 0..50 {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let _ = dispatcher.call("m", None, Duration::from_secs(60)).await;
            });
        }

        let mut seen = HashSet::new();
        for _ in 0..50 {
            let sent = transport.next_sent().await;
            let id = sent["id"].as_u64().expect("numeric id");
            assert!((1..=50).contains(&id));
            assert!(seen.insert(id), "id {id} reused");
        }
        dispatcher.fail_all(|| Error::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_pending_limit() {
        let (dispatcher, transport) = dispatcher(1);

        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.call("a", None, Duration::from_secs(60)).await })
        };
        let _ = transport.next_sent().await;

        let err = dispatcher
            .call("b", None, Duration::from_secs(60))
            .await
            .expect_err("limit");
        assert!(matches!(err, Error::Protocol { .. }));

        dispatcher.fail_all(|| Error::ConnectionClosed);
        assert!(first.await.expect("join").is_err());
    }

    #[tokio::test]
    async fn test_notify_has_no_id() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);
        dispatcher
            .notify("notifications/initialized", None)
            .await
            .expect("notify");

        let sent = transport.next_sent().await;
        assert!(sent.get("id").is_none());
        assert_eq!(sent["method"], "notifications/initialized");
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_server_request() {
        let (dispatcher, transport) = dispatcher(DEFAULT_MAX_PENDING);
        let text = r#"{"jsonrpc":"2.0","id":"srv-1","method":"client/ping"}"#;
        let Incoming::Request(request) = Incoming::parse(text).expect("parse") else {
            panic!("expected request");
        };

        dispatcher.reject_server_request(&request).await;
        let sent = transport.next_sent().await;
        assert_eq!(sent["id"], "srv-1");
        assert_eq!(sent["error"]["code"], -32601);
    }
}
