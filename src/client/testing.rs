//! In-memory transport for unit tests.
//!
//! [`MockTransport`] records every outbound message and lets a test inject
//! inbound traffic and lifecycle events, playing the server side by hand.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::message::success_envelope;
use crate::transport::{EventSender, Transport, TransportEvent};

// ============================================================================
// MockTransport
// ============================================================================

/// Scriptable transport.
pub(crate) struct MockTransport {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_sends: AtomicBool,
    closes: AtomicUsize,
    events: Mutex<Option<EventSender>>,
    sent_tx: mpsc::UnboundedSender<String>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            events: Mutex::new(None),
            sent_tx,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
        }
    }

    /// A transport that accepts sends without `connect`.
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Next outbound message, parsed.
    pub async fn next_sent(&self) -> Value {
        let text = self
            .sent_rx
            .lock()
            .await
            .recv()
            .await
            .expect("sender lives as long as the transport");
        serde_json::from_str(&text).expect("client sends JSON")
    }

    /// Outbound message already queued, if any.
    pub fn try_next_sent(&self) -> Option<Value> {
        let mut rx = self.sent_rx.try_lock().ok()?;
        let text = rx.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Injects a transport event.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Injects an inbound JSON message.
    pub fn push(&self, message: Value) {
        self.emit(TransportEvent::Message(message.to_string()));
    }

    /// Simulates the channel dropping.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Closed);
    }

    /// Reads the next request and answers it with `result`.
    pub async fn answer(&self, result: Value) -> Value {
        let request = self.next_sent().await;
        let id: RequestId =
            serde_json::from_value(request["id"].clone()).expect("answered message is a request");
        self.push(success_envelope(&id, result));
        request
    }

    /// Reads the next request and answers it with an error object.
    pub async fn answer_error(&self, error: Value) -> Value {
        let request = self.next_sent().await;
        self.push(json!({"jsonrpc": "2.0", "id": request["id"], "error": error}));
        request
    }

    /// Plays the server side of a full handshake.
    ///
    /// Returns `[initialize, initialized, subscribe]` as sent by the client.
    pub async fn serve_handshake(&self, server_version: &str) -> Vec<Value> {
        let initialize = self
            .answer(json!({
                "protocolVersion": server_version,
                "serverInfo": {"name": "mock-server", "version": "9.9.9"},
                "capabilities": {"events": ["page", "console"], "streaming": true}
            }))
            .await;
        let initialized = self.next_sent().await;
        let subscribe = self.answer(json!({"subscribed": true})).await;
        vec![initialize, initialized, subscribe]
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, events: EventSender) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection("mock refused"));
        }
        *self.events.lock() = Some(events);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() || self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.sent_tx
            .send(message)
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.events.lock().take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
