//! HTTP POST + Server-Sent Events transport.
//!
//! For environments where WebSockets are unavailable.
//!
//! | Direction | Endpoint | Body |
//! |-----------|----------|------|
//! | Client → Server | `POST {base}/message` | one JSON-RPC message |
//! | Server → Client | `GET {base}/events` | `text/event-stream` |
//!
//! Only `message` events carry protocol traffic. `error` events are
//! reported as [`TransportEvent::Error`]; other event types are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{EventSender, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Path of the outbound endpoint, relative to the base URL.
const MESSAGE_PATH: &str = "message";

/// Path of the event stream, relative to the base URL.
const EVENTS_PATH: &str = "events";

/// Default timeout for each POST.
const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(30);

/// Event type carrying protocol messages.
const MESSAGE_EVENT: &str = "message";

/// Event type carrying server-side stream errors.
const ERROR_EVENT: &str = "error";

// ============================================================================
// SseEvent
// ============================================================================

/// One dispatched Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the server sent none.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last `id:` field, if any.
    pub id: Option<String>,
}

// ============================================================================
// SseParser
// ============================================================================

/// Incremental `text/event-stream` parser.
///
/// Works on raw bytes: chunks may split events, lines, `\r\n` pairs or
/// multibyte characters anywhere. A line is decoded only once its
/// terminator has arrived, and `\r`, `\n` never occur inside a UTF-8
/// sequence.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    pending: PendingEvent,
}

/// Fields collected since the last blank line.
#[derive(Debug, Default)]
struct PendingEvent {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Creates an empty parser.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk.as_ref());

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..]
            .iter()
            .position(|b| matches!(b, b'\n' | b'\r'))
        {
            let end = start + offset;
            let next = match (self.buffer[end], self.buffer.get(end + 1)) {
                (b'\r', Some(b'\n')) => end + 2,
                // A trailing CR may be the first half of CRLF.
                (b'\r', None) => break,
                _ => end + 1,
            };

            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = next;
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        self.buffer.drain(..start);
        events
    }

    /// Applies one line. A blank line dispatches the pending event; events
    /// without data lines yield nothing.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            if pending.data.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event: pending.event.unwrap_or_else(|| MESSAGE_EVENT.to_string()),
                data: pending.data.join("\n"),
                id: pending.id,
            });
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => self.pending.data.push(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
        None
    }
}

// ============================================================================
// SseTransport
// ============================================================================

/// HTTP POST + SSE channel.
pub struct SseTransport {
    message_url: Url,
    events_url: Url,
    http: reqwest::Client,
    connected: Arc<AtomicBool>,
    closing: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Creates a transport rooted at `base`.
    ///
    /// The query string of `base` (e.g. the token) is kept on both endpoints.
    ///
    /// # Errors
    ///
    /// [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(base: &Url) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let (closing, _) = watch::channel(false);

        Ok(Self {
            message_url: Self::endpoint(base, MESSAGE_PATH),
            events_url: Self::endpoint(base, EVENTS_PATH),
            http,
            connected: Arc::new(AtomicBool::new(false)),
            closing,
            task: Mutex::new(None),
        })
    }

    /// Outbound endpoint.
    #[inline]
    #[must_use]
    pub fn message_url(&self) -> &Url {
        &self.message_url
    }

    /// Event stream endpoint.
    #[inline]
    #[must_use]
    pub fn events_url(&self) -> &Url {
        &self.events_url
    }

    fn endpoint(base: &Url, leaf: &str) -> Url {
        let mut url = base.clone();
        let path = format!("{}/{leaf}", base.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }

    async fn read_stream(
        response: reqwest::Response,
        events: EventSender,
        connected: Arc<AtomicBool>,
        mut closing: watch::Receiver<bool>,
    ) {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = closing.wait_for(|c| *c) => {
                    debug!("SSE reader stopped by close");
                    connected.store(false, Ordering::Release);
                    return;
                }
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.feed(&bytes[..]) {
                        trace!(event = %event.event, len = event.data.len(), "SSE event");
                        match event.event.as_str() {
                            MESSAGE_EVENT => {
                                let _ = events.send(TransportEvent::Message(event.data));
                            }
                            ERROR_EVENT => {
                                let _ = events.send(TransportEvent::Error(format!(
                                    "SSE error: {}",
                                    event.data
                                )));
                            }
                            other => debug!(event = other, "Ignoring SSE event type"),
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Error reading SSE stream");
                    if !*closing.borrow() {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                    }
                    break;
                }
                None => {
                    warn!("SSE stream ended");
                    break;
                }
            }
        }

        connected.store(false, Ordering::Release);
        if !*closing.borrow() {
            let _ = events.send(TransportEvent::Closed);
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self, events: EventSender) -> Result<()> {
        {
            let task = self.task.lock();
            if task.as_ref().is_some_and(|t| !t.is_finished()) {
                return Err(Error::connection("transport already connected"));
            }
        }

        self.closing.send_replace(false);

        let response = self
            .http
            .get(self.events_url.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await
            .map_err(|e| Error::connection(format!("{}: {e}", self.events_url)))?;

        if !response.status().is_success() {
            return Err(Error::connection(format!(
                "{}: HTTP {}",
                self.events_url,
                response.status()
            )));
        }

        self.connected.store(true, Ordering::Release);
        let task = tokio::spawn(Self::read_stream(
            response,
            events,
            Arc::clone(&self.connected),
            self.closing.subscribe(),
        ));
        *self.task.lock() = Some(task);

        debug!(url = %self.events_url, "SSE connected");
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        self.http
            .post(self.message_url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(message)
            .timeout(DEFAULT_POST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closing.send_replace(true);

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "SSE reader task failed");
        }

        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_single_message() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "{\"a\":1}".into(),
                id: None
            }]
        );
    }

    #[test]
    fn test_parse_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"jsonrpc\"").is_empty());
        assert!(parser.feed(":\"2.0\"}\n").is_empty());
        let events = parser.feed("\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"jsonrpc\":\"2.0\"}");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_parse_multiline_data_and_id() {
        let mut parser = SseParser::new();
        let events = parser.feed("id: 7\r\ndata: line1\r\ndata: line2\r\n\r\n");
        assert_eq!(events[0].data, "line1\nline2");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_skips_comments_and_empty_events() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\n\nevent: ping\n\nevent: error\ndata: boom\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "error");
        assert_eq!(events[0].data, "boom");
    }

    #[test]
    fn test_parse_crlf_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"a\":\r").is_empty());
        let events = parser.feed("\ndata: 1}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":\n1}");
    }

    #[test]
    fn test_parse_lone_cr_terminates_line() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: x\r\rdata: y\r\r");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "x");
        assert_eq!(events[1].data, "y");
    }

    #[test]
    fn test_parse_multibyte_char_split_across_chunks() {
        let text = "data: {\"title\":\"café\"}\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xC3).expect("é lead byte") + 1;

        let mut parser = SseParser::new();
        assert!(parser.feed(&text[..split]).is_empty());
        let events = parser.feed(&text[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"title\":\"café\"}");
    }

    #[test]
    fn test_endpoints_keep_query() {
        let base = Url::parse("http://localhost:9222/bap/?token=t").expect("url");
        let transport = SseTransport::new(&base).expect("transport");
        assert_eq!(transport.events_url().as_str(), "http://localhost:9222/bap/events?token=t");
        assert_eq!(transport.message_url().as_str(), "http://localhost:9222/bap/message?token=t");
    }

    /// Reads one HTTP/1.1 request; returns the request line and body.
    async fn read_request(stream: &mut TcpStream) -> (String, String) {
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        let head_end = loop {
            let n = stream.read(&mut buf).await.expect("read");
            assert!(n > 0, "client hung up");
            raw.extend_from_slice(&buf[..n]);
            if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&raw[..head_end]).to_string();
        let length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        while raw.len() < head_end + length {
            let n = stream.read(&mut buf).await.expect("read");
            raw.extend_from_slice(&buf[..n]);
        }

        let request_line = head.lines().next().unwrap_or_default().to_string();
        let body = String::from_utf8_lossy(&raw[head_end..head_end + length]).to_string();
        (request_line, body)
    }

    #[tokio::test]
    async fn test_stream_messages_posts_and_remote_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (posted_tx, mut posted_rx) = mpsc::unbounded_channel::<String>();
        let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut finish_rx = Some(finish_rx);
            loop {
                let (mut stream, _) = listener.accept().await.expect("accept");
                let (line, body) = read_request(&mut stream).await;

                if line.starts_with("GET /events") {
                    let finish = finish_rx.take().expect("single stream");
                    tokio::spawn(async move {
                        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
                        stream.write_all(head.as_bytes()).await.expect("head");
                        stream
                            .write_all(b"event: message\ndata: {\"n\":1}\n\nevent: error\ndata: oops\n\n")
                            .await
                            .expect("events");
                        let _ = finish.await;
                        let _ = stream.shutdown().await;
                    });
                } else {
                    let _ = posted_tx.send(body);
                    let reply = "HTTP/1.1 204 No Content\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
                    let _ = stream.write_all(reply.as_bytes()).await;
                }
            }
        });

        let base = Url::parse(&format!("http://{addr}")).expect("url");
        let transport = SseTransport::new(&base).expect("transport");
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx).await.expect("connect");
        assert!(transport.is_connected());

        assert_eq!(rx.recv().await, Some(TransportEvent::Message("{\"n\":1}".into())));
        assert_eq!(rx.recv().await, Some(TransportEvent::Error("SSE error: oops".into())));

        transport.send("{\"id\":1}".into()).await.expect("post");
        assert_eq!(posted_rx.recv().await.as_deref(), Some("{\"id\":1}"));

        let _ = finish_tx.send(());
        assert_eq!(rx.recv().await, Some(TransportEvent::Closed));
        assert!(!transport.is_connected());

        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_multibyte_payload_split_across_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let _ = read_request(&mut stream).await;

            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
            stream.write_all(head.as_bytes()).await.expect("head");

            let body = "event: message\r\ndata: {\"title\":\"café\"}\r\n\r\n".as_bytes();
            let split = body.iter().position(|b| *b == 0xC3).expect("é lead byte") + 1;
            stream.write_all(&body[..split]).await.expect("first half");
            stream.flush().await.expect("flush");
            tokio::time::sleep(Duration::from_millis(50)).await;
            stream.write_all(&body[split..]).await.expect("second half");
            stream.flush().await.expect("flush");

            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let base = Url::parse(&format!("http://{addr}")).expect("url");
        let transport = SseTransport::new(&base).expect("transport");
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.connect(tx).await.expect("connect");

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Message("{\"title\":\"café\"}".into()))
        );
        transport.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let base = Url::parse("http://127.0.0.1:1").expect("url");
        let transport = SseTransport::new(&base).expect("transport");
        assert!(matches!(
            transport.send("{}".into()).await,
            Err(Error::NotConnected)
        ));
    }
}
