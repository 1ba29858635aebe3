//! WebSocket client for the sync server.
//!
//! Provides:
//! - Connection lifecycle with automatic reconnect
//! - Correlated requests over one shared connection ([`ConnectionSession`])
//! - A mirrored local document with path views ([`View`])
//! - Fire-and-forget writes whose failures go to an [`ErrorSink`]
//!
//! ```text
//! View::set ──► Mirror (local) ──► SyncClient::put ──► ConnectionSession
//!                                                          │ queue / correlate
//!                                 supervisor task ◄────────┘
//!                                   │ connect, on_open, reader/writer loop
//!                                   ▼
//!                               WebSocket ──► SyncServer
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::mirror::{Mirror, View};
use crate::protocol::Operation;
use crate::session::{
    ClientError, ConnectionSession, ConnectionState, PendingReply, Reply, SessionConfig,
};
use crate::value::{Document, Path, Value};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://localhost:8080`
    pub host: String,
    /// Shared secret matching the server's token
    pub auth_token: String,
    /// Per-request timeout once sent (None = wait forever)
    pub request_timeout: Option<Duration>,
    /// Delay between reconnect attempts (None = do not reconnect)
    pub reconnect_delay: Option<Duration>,
    /// Maximum operations queued while disconnected
    pub max_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "ws://localhost:8080".to_string(),
            auth_token: String::new(),
            request_timeout: Some(Duration::from_secs(30)),
            reconnect_delay: Some(Duration::from_secs(1)),
            max_queue: 10_000,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            auth_token: auth_token.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Option<Duration>) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_queue(mut self, max: usize) -> Self {
        self.max_queue = max;
        self
    }
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connected and the initial snapshot is loaded
    Connected,
    /// Connection lost
    Disconnected,
    /// Transport failure or a server error not tied to a request
    Error(String),
}

/// Receives failures of background work (fire-and-forget writes,
/// snapshot loads) that have no caller to return them to.
pub trait ErrorSink: Send + Sync {
    fn report(&self, context: &str, error: &ClientError);
}

/// Default sink: `log::error!`.
#[derive(Debug, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, context: &str, error: &ClientError) {
        log::error!("Error {context}: {error}");
    }
}

struct ClientShared {
    config: ClientConfig,
    session: ConnectionSession,
    mirror: Mirror,
    error_sink: Arc<dyn ErrorSink>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Stops the supervisor once the last user-facing handle is gone. The
/// supervisor task itself only holds `ClientShared`, never this guard.
struct ShutdownOnDrop {
    shared: Arc<ClientShared>,
}

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}

/// The sync client. Cheap to clone; clones share one connection.
///
/// Dropping the last clone (views included) stops reconnecting and closes
/// the connection, as [`SyncClient::disconnect`] would.
#[derive(Clone)]
pub struct SyncClient {
    shared: Arc<ClientShared>,
    _guard: Arc<ShutdownOnDrop>,
}

impl SyncClient {
    /// Create a client. Nothing is sent until [`SyncClient::connect`].
    pub fn new(config: ClientConfig) -> Self {
        Self::with_error_sink(config, Arc::new(LogErrorSink))
    }

    pub fn with_error_sink(config: ClientConfig, error_sink: Arc<dyn ErrorSink>) -> Self {
        let session = ConnectionSession::new(SessionConfig {
            auth_token: config.auth_token.clone(),
            request_timeout: config.request_timeout,
            max_queue: config.max_queue,
        });
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(ClientShared {
            config,
            session,
            mirror: Mirror::new(),
            error_sink,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            shutdown,
            supervisor: Mutex::new(None),
        });
        Self {
            _guard: Arc::new(ShutdownOnDrop {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.shared.event_rx.lock().take()
    }

    /// Start the connection supervisor.
    ///
    /// Returns immediately; [`SyncEvent::Connected`] is emitted once the
    /// socket is open and the initial snapshot is loaded. Calling this
    /// while already running is a no-op.
    pub fn connect(&self) {
        let mut supervisor = self.shared.supervisor.lock();
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shared.shutdown.send_replace(false);
        let shared = Arc::clone(&self.shared);
        *supervisor = Some(tokio::spawn(supervise(shared)));
    }

    /// Close the connection and stop reconnecting.
    ///
    /// In-flight requests fail with [`ClientError::ConnectionClosed`];
    /// queued operations stay queued for a later [`SyncClient::connect`].
    pub async fn disconnect(&self) {
        self.shared.shutdown.send_replace(true);
        let handle = self.shared.supervisor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Connection supervisor failed: {e}");
            }
        }
    }

    /// Issue an operation and get a future for its reply.
    pub fn send(&self, operation: Operation) -> PendingReply {
        self.shared.session.send(operation)
    }

    /// Fetch the full document from the server.
    pub async fn get_data(&self) -> Result<Document, ClientError> {
        match self.send(Operation::GetData).await? {
            Reply::Value(doc) => Ok(doc),
            Reply::Success => Ok(Document::new()),
        }
    }

    /// Send a put in the background; does not touch the mirror.
    pub fn put(&self, path: Path, value: Value) {
        let pending = self.send(Operation::Put { path, value });
        self.detach("sending put", async move { pending.await.map(|_| ()) });
    }

    /// Send a delete in the background; the mirror entry is removed once
    /// the server confirms.
    pub fn delete(&self, path: Path) {
        let confirmed = self.delete_confirmed(path);
        self.detach("sending delete", async move { confirmed.await.map(|_| ()) });
    }

    /// Send a delete now and remove the mirror entry once confirmed.
    pub fn delete_confirmed(
        &self,
        path: Path,
    ) -> impl Future<Output = Result<Reply, ClientError>> + Send + 'static {
        let pending = self.send(Operation::Delete { path: path.clone() });
        let mirror = self.shared.mirror.clone();
        async move {
            let reply = pending.await?;
            mirror.apply_delete(&path);
            Ok(reply)
        }
    }

    /// Run `fut` in the background, reporting its failure to the error sink.
    pub(crate) fn detach<F>(&self, context: &'static str, fut: F)
    where
        F: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let sink = Arc::clone(&self.shared.error_sink);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = fut.await {
                        sink.report(context, &e);
                    }
                });
            }
            Err(_) => log::warn!("No async runtime; outcome of {context} will not be observed"),
        }
    }

    /// Root view of the mirrored document.
    pub fn database(&self) -> View {
        View::new(self.clone(), Path::new())
    }

    pub fn mirror(&self) -> &Mirror {
        &self.shared.mirror
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.shared.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.session.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Operations waiting for a connection.
    pub fn queue_len(&self) -> usize {
        self.shared.session.queue_len()
    }
}

impl ClientShared {
    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            log::trace!("Dropping client event: {e}");
        }
    }

    fn handle_frame(&self, bytes: &[u8]) {
        if let Some(err) = self.session.on_message(bytes) {
            self.emit(SyncEvent::Error(err.to_string()));
        }
    }

    /// Drive one open socket until it closes or shutdown is requested.
    async fn run_connection(
        &self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let (mut writer, mut reader) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        // Record local edits from here on so the snapshot cannot clobber them
        self.mirror.begin_load();
        let (mut load, flushed) = self.session.on_open(out_tx);
        self.mirror.replay_first(
            flushed
                .into_iter()
                .filter(|op| matches!(op, Operation::Put { .. }))
                .collect(),
        );
        let mut loaded = false;

        loop {
            tokio::select! {
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = writer.send(Message::Binary(frame.into())).await {
                        log::warn!("Failed to send frame: {e}");
                        self.emit(SyncEvent::Error(e.to_string()));
                        break;
                    }
                }

                msg = reader.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => self.handle_frame(&data),
                        Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str().as_bytes()),
                        Some(Ok(Message::Ping(data))) => {
                            let _ = writer.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection to {} closed", self.config.host);
                            break;
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error: {e}");
                            self.emit(SyncEvent::Error(e.to_string()));
                            break;
                        }
                        _ => {}
                    }
                }

                result = &mut load, if !loaded => {
                    loaded = true;
                    match result {
                        Ok(reply) => self.mirror.finish_load(reply.into_document()),
                        Err(e) => {
                            self.error_sink.report("loading data", &e);
                            self.mirror.finish_load(None);
                        }
                    }
                    self.emit(SyncEvent::Connected);
                }

                _ = shutdown.changed() => {
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        if !loaded {
            self.mirror.finish_load(None);
        }
    }
}

/// Connect, run, and reconnect until shutdown.
async fn supervise(shared: Arc<ClientShared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let host = shared.config.host.clone();

    loop {
        if *shutdown.borrow() {
            break;
        }
        shared.session.on_connecting();
        log::debug!("Connecting to {host}");

        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(host.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((ws, _)) => {
                log::info!("Connected to {host}");
                shared.run_connection(ws, &mut shutdown).await;
                shared.session.on_close();
                shared.emit(SyncEvent::Disconnected);
            }
            Err(e) => {
                log::warn!("Connection to {host} failed: {e}");
                shared.session.on_close();
                shared.emit(SyncEvent::Error(e.to_string()));
            }
        }

        let Some(delay) = shared.config.reconnect_delay else {
            break;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.session.on_close();
    log::debug!("Connection supervisor for {host} stopped");
}
