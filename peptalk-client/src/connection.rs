//! Connection management and request correlation.

use crate::error::ClientError;
use peptalk_protocol::{
    Command, Decoder, Encoder, InboundMessage, PepError, RequestId, Response, DEFAULT_PORT,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// PepTalk port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection lifecycle and server-pushed traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport opened.
    Connected,
    /// Unsolicited message from the server.
    Message { id: RequestId, body: String },
    /// A response arrived for an id nobody is waiting for (e.g. after a timeout).
    Unmatched(PepError),
    /// Transport closed, by either side.
    Closed,
}

/// Default capacity for the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct PendingRequest {
    sent: String,
    tx: oneshot::Sender<Result<Response, PepError>>,
}

/// Removes a pending entry when the request future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a parking_lot::Mutex<HashMap<u64, PendingRequest>>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

struct Inner {
    config: ConnectionConfig,
    /// Write half of the transport. `None` while disconnected.
    writer: Mutex<Option<BoxedWriter>>,
    /// Requests waiting for a response, by id.
    pending: parking_lot::Mutex<HashMap<u64, PendingRequest>>,
    /// Next request id.
    next_id: AtomicU64,
    connected: AtomicBool,
    /// Bumped on every connect and close so a stale read loop cannot tear
    /// down its successor.
    generation: AtomicU64,
    request_timeout_ms: AtomicU64,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// A PepTalk connection to a Media Sequencer Engine.
///
/// Requests may be issued concurrently; responses are matched to requests
/// by id regardless of the order they arrive in.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let request_timeout_ms = config.request_timeout.as_millis() as u64;
        Self {
            inner: Arc::new(Inner {
                config,
                writer: Mutex::new(None),
                pending: parking_lot::Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                request_timeout_ms: AtomicU64::new(request_timeout_ms),
                reader_task: parking_lot::Mutex::new(None),
                events,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Connects to the server and negotiates the PepTalk protocol.
    ///
    /// Returns the response to `protocol peptalk` (or `protocol peptalk
    /// noevents` when `noevents` is set).
    pub async fn connect(&self, noevents: bool) -> Result<Response, ClientError> {
        let addr = self.inner.config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let timeout = self.inner.config.connect_timeout;
        let tcp_stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::ConnectTimeout {
                    addr: addr.clone(),
                    timeout,
                }
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;

        tcp_stream.set_nodelay(true).ok();
        self.connect_with(tcp_stream, noevents).await
    }

    /// Runs the protocol over an already open transport.
    pub async fn connect_with<S>(&self, stream: S, noevents: bool) -> Result<Response, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        *self.inner.writer.lock().await = Some(Box::new(write_half));

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.connected.store(true, Ordering::SeqCst);

        let task = tokio::spawn(read_loop(self.inner.clone(), read_half, generation));
        if let Some(old) = self.inner.reader_task.lock().replace(task) {
            old.abort();
        }
        let _ = self.inner.events.send(ConnectionEvent::Connected);
        tracing::debug!("Transport open, negotiating protocol");

        let mut capabilities = vec!["peptalk".to_string()];
        if noevents {
            capabilities.push("noevents".to_string());
        }
        self.send(Command::Protocol { capabilities }).await
    }

    /// Sends a command and waits for its response or the request timeout.
    pub async fn send(&self, command: Command) -> Result<Response, ClientError> {
        let text = command.encode()?;
        self.send_text(text).await
    }

    /// Sends pre-encoded request text and waits for its response.
    pub async fn send_text(&self, text: String) -> Result<Response, ClientError> {
        let inner = &self.inner;
        if !inner.connected.load(Ordering::SeqCst) {
            tracing::debug!("send() called but not connected");
            return Err(ClientError::NotConnected);
        }

        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        inner.pending.lock().insert(
            id,
            PendingRequest {
                sent: text.clone(),
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &inner.pending,
            id,
        };

        // The transport may have died between the check above and the insert.
        if !inner.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let line = Encoder::encode_line(id, &text);
        {
            let mut writer_guard = inner.writer.lock().await;
            let Some(writer) = writer_guard.as_mut() else {
                return Err(ClientError::NotConnected);
            };
            if let Err(e) = writer.write_all(&line).await {
                return Err(ClientError::Io(e));
            }
        }
        tracing::debug!("Request id={} sent: {}", id, text);

        let timeout = self.request_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                tracing::debug!("Request id={} timed out", id);
                Err(PepError::Timeout {
                    id: RequestId::Id(id),
                    sent: Some(text),
                    timeout,
                }
                .into())
            }
            Ok(Err(_)) => {
                tracing::debug!("Request id={} channel closed", id);
                Err(ClientError::ConnectionClosed)
            }
            Ok(Ok(result)) => result.map_err(ClientError::from),
        }
    }

    /// Sends `close`; on success the transport is released.
    pub async fn close(&self) -> Result<Response, ClientError> {
        tracing::debug!("Closing connection...");
        let response = self.send(Command::Close).await?;
        self.disconnect().await;
        Ok(response)
    }

    /// Drops the transport without telling the server.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        let was_connected = inner.connected.swap(false, Ordering::SeqCst);

        if let Some(mut writer) = inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(task) = inner.reader_task.lock().take() {
            task.abort();
        }
        inner.fail_pending();

        if was_connected {
            let _ = inner.events.send(ConnectionEvent::Closed);
        }
        tracing::debug!("Connection closed");
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Returns the timeout applied to each request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.request_timeout_ms.load(Ordering::SeqCst))
    }

    /// Changes the timeout applied to subsequent requests.
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.inner
            .request_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    /// Returns the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl Inner {
    fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::Response { id, outcome } => {
                let pending = self.pending.lock().remove(&id);
                match pending {
                    Some(request) => {
                        tracing::debug!("read_loop: dispatching response id={}", id);
                        let _ = request.tx.send(outcome.into_result(id, &request.sent));
                    }
                    None => {
                        tracing::warn!("read_loop: no pending request for id={}", id);
                        let err = PepError::unspecified(
                            id,
                            format!("unmatched response: {:?}", outcome),
                            None,
                        );
                        // No subscribers is fine.
                        let _ = self.events.send(ConnectionEvent::Unmatched(err));
                    }
                }
            }
            InboundMessage::Event { id, body } => {
                tracing::debug!("read_loop: event {}", body);
                let _ = self.events.send(ConnectionEvent::Message { id, body });
            }
        }
    }

    /// Fails every waiting request with `ConnectionClosed`.
    fn fail_pending(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            tracing::debug!("Clearing {} pending requests", pending.len());
        }
        // Dropping the senders wakes the waiters.
        pending.clear();
    }

    async fn transport_lost(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();
        self.fail_pending();
        let _ = self.events.send(ConnectionEvent::Closed);
    }
}

async fn read_loop<R>(inner: Arc<Inner>, mut reader: R, generation: u64)
where
    R: AsyncRead + Unpin,
{
    tracing::debug!("read_loop started");
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; inner.config.read_buffer_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("read_loop: connection closed by peer");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("read_loop: read failed: {}", e);
                break;
            }
        };

        match decoder.feed(&buf[..n]) {
            Ok(messages) => {
                for message in messages {
                    inner.dispatch(message);
                }
            }
            Err(e) => {
                tracing::warn!("read_loop: {}", e);
                break;
            }
        }
    }

    inner.transport_lost(generation).await;
}
