//! WebSocket transport and event loop.
//!
//! `connect` opens the socket and spawns a tokio task that owns both halves
//! of the stream. The task handles:
//!
//! - Incoming text frames, forwarded as [`TransportEvent::Message`]
//! - Outgoing writes requested by [`WebSocketTransport::send`]
//! - Unexpected termination, followed by auto-reconnect when configured
//!
//! `send` waits until the frame has been written, so a write failure
//! surfaces to the caller.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::reconnect::{self, Outcome, ReconnectPolicy};
use super::{EventSender, Transport, TransportEvent};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Internal commands for the event loop.
enum LoopCommand {
    /// Write one text frame and report the outcome.
    Send {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Close the socket and stop.
    Shutdown,
}

/// Why a socket pump returned.
enum PumpExit {
    /// Explicit shutdown.
    Shutdown,
    /// Remote closed, stream ended or read failed.
    Dropped,
}

/// State shared between the handle and the event loop.
struct Shared {
    connected: AtomicBool,
    reconnecting: AtomicBool,
    closing: watch::Sender<bool>,
    command_tx: Mutex<Option<mpsc::UnboundedSender<LoopCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket channel with optional auto-reconnect.
///
/// # Example
///
/// ```ignore
/// use bap_client::transport::{ReconnectPolicy, Transport, WebSocketTransport};
///
/// let url = url::Url::parse("ws://localhost:9222")?;
/// let transport = WebSocketTransport::new(url).with_reconnect(ReconnectPolicy::default());
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// transport.connect(tx).await?;
/// ```
pub struct WebSocketTransport {
    url: Url,
    reconnect: Option<ReconnectPolicy>,
    shared: Arc<Shared>,
}

impl WebSocketTransport {
    /// Creates a transport for `url`. Auto-reconnect is off.
    #[must_use]
    pub fn new(url: Url) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            url,
            reconnect: None,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                closing,
                command_tx: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Enables auto-reconnect with `policy`.
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Endpoint this transport dials.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns `true` while a reconnect run is in progress.
    #[inline]
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.shared.reconnecting.load(Ordering::Acquire)
    }

    async fn open(url: &Url) -> Result<WsStream> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("{url}: {e}")))?;
        Ok(stream)
    }

    /// Event loop. Survives socket replacement on reconnect.
    async fn run_event_loop(
        mut ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        events: EventSender,
        shared: Arc<Shared>,
        url: Url,
        policy: Option<ReconnectPolicy>,
    ) {
        loop {
            match Self::pump(ws_stream, &mut command_rx, &events).await {
                PumpExit::Shutdown => break,
                PumpExit::Dropped => {
                    shared.connected.store(false, Ordering::Release);

                    let Some(policy) = policy else {
                        let _ = events.send(TransportEvent::Closed);
                        break;
                    };

                    let mut closing = shared.closing.subscribe();
                    let outcome = reconnect::run(
                        &policy,
                        &shared.reconnecting,
                        &mut closing,
                        |attempt, max_attempts| {
                            info!(attempt, max_attempts, "Reconnecting");
                            let _ = events.send(TransportEvent::Reconnecting {
                                attempt,
                                max_attempts,
                            });
                        },
                        || Self::open(&url),
                    )
                    .await;

                    match outcome {
                        Outcome::Reconnected(stream) => {
                            ws_stream = stream;
                            shared.connected.store(true, Ordering::Release);
                            info!("Reconnected");
                            let _ = events.send(TransportEvent::Reconnected);
                        }
                        Outcome::Aborted => break,
                        Outcome::Failed { attempts } => {
                            let err = Error::ReconnectFailed { attempts };
                            error!(error = %err, "Giving up");
                            let _ = events.send(TransportEvent::Error(err.to_string()));
                            let _ = events.send(TransportEvent::Closed);
                            break;
                        }
                    }
                }
            }
        }

        shared.connected.store(false, Ordering::Release);

        // Writes queued behind the exit never reach the socket.
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            if let LoopCommand::Send { ack, .. } = command {
                let _ = ack.send(Err(Error::ConnectionClosed));
            }
        }

        debug!("Event loop terminated");
    }

    /// Drives one socket until it ends.
    async fn pump(
        ws_stream: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<LoopCommand>,
        events: &EventSender,
    ) -> PumpExit {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(len = text.len(), "Frame received");
                            let _ = events.send(TransportEvent::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                let _ = events.send(TransportEvent::Message(text));
                            }
                            Err(_) => warn!(len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                        },

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            return PumpExit::Dropped;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            return PumpExit::Dropped;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            return PumpExit::Dropped;
                        }

                        // Ping, Pong, raw frames
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send { text, ack }) => {
                            let result = ws_write
                                .send(Message::Text(text.into()))
                                .await
                                .map_err(Error::from);
                            let _ = ack.send(result);
                        }

                        Some(LoopCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            return PumpExit::Shutdown;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            return PumpExit::Shutdown;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, events: EventSender) -> Result<()> {
        {
            let mut task = self.shared.task.lock();
            if task.as_ref().is_some_and(|t| !t.is_finished()) {
                return Err(Error::connection("transport already connected"));
            }
            *task = None;
        }

        self.shared.closing.send_replace(false);
        let ws_stream = Self::open(&self.url).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.shared.command_tx.lock() = Some(command_tx);
        self.shared.connected.store(true, Ordering::Release);

        let task = tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            events,
            Arc::clone(&self.shared),
            self.url.clone(),
            self.reconnect,
        ));
        *self.shared.task.lock() = Some(task);

        debug!(url = %self.url, "WebSocket connected");
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let (ack, ack_rx) = oneshot::channel();
        {
            let guard = self.shared.command_tx.lock();
            let command_tx = guard.as_ref().ok_or(Error::NotConnected)?;
            command_tx
                .send(LoopCommand::Send { text: message, ack })
                .map_err(|_| Error::ConnectionClosed)?;
        }

        ack_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    async fn close(&self) -> Result<()> {
        self.shared.closing.send_replace(true);

        if let Some(command_tx) = self.shared.command_tx.lock().take() {
            let _ = command_tx.send(LoopCommand::Shutdown);
        }

        let task = self.shared.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Event loop task failed");
        }

        self.shared.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn echo_server() -> (Url, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() && ws.send(message).await.is_err() {
                    break;
                }
            }
        });
        (Url::parse(&format!("ws://{addr}")).expect("url"), handle)
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let transport = WebSocketTransport::new(Url::parse("ws://127.0.0.1:1").expect("url"));
        let err = transport.send("{}".into()).await.expect_err("not connected");
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let transport = WebSocketTransport::new(Url::parse(&format!("ws://{addr}")).expect("url"));
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = transport.connect(tx).await.expect_err("refused");
        assert!(matches!(err, Error::Connection { .. }));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_echo_round_trip_and_close() {
        let (url, _server) = echo_server().await;
        let transport = WebSocketTransport::new(url);
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.connect(tx).await.expect("connect");
        assert!(transport.is_connected());

        transport.send(r#"{"ping":1}"#.into()).await.expect("send");
        let event = rx.recv().await.expect("event");
        assert_eq!(event, TransportEvent::Message(r#"{"ping":1}"#.into()));

        transport.close().await.expect("close");
        assert!(!transport.is_connected());
        transport.close().await.expect("second close is a no-op");

        let err = transport.send("{}".into()).await.expect_err("closed");
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_remote_close_emits_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            let _ = ws.close(None).await;
        });

        let transport = WebSocketTransport::new(Url::parse(&format!("ws://{addr}")).expect("url"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx).await.expect("connect");

        loop {
            match rx.recv().await.expect("event") {
                TransportEvent::Closed => break,
                TransportEvent::Error(_) => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_after_remote_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            // First session is dropped immediately, second one echoes.
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            let _ = ws.close(None).await;

            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() && ws.send(message).await.is_err() {
                    break;
                }
            }
        });

        let url = Url::parse(&format!("ws://{addr}")).expect("url");
        let transport = WebSocketTransport::new(url)
            .with_reconnect(ReconnectPolicy::new(3, std::time::Duration::from_millis(10)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx).await.expect("connect");

        let mut saw_attempt = false;
        loop {
            match rx.recv().await.expect("event") {
                TransportEvent::Reconnecting { attempt, max_attempts } => {
                    assert_eq!(max_attempts, 3);
                    assert!(attempt >= 1);
                    saw_attempt = true;
                }
                TransportEvent::Reconnected => break,
                TransportEvent::Error(_) => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_attempt);
        assert!(transport.is_connected());

        transport.send("\"again\"".into()).await.expect("send");
        assert_eq!(
            rx.recv().await.expect("event"),
            TransportEvent::Message("\"again\"".into())
        );
        transport.close().await.expect("close");
    }
}
