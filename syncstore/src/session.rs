//! Client connection session: request correlation and the offline queue.
//!
//! ```text
//!            on_connecting()          on_open(tx)
//! Disconnected ─────────► Connecting ─────────► Connected
//!      ▲                                            │
//!      └──────────────── on_close() ◄───────────────┘
//! ```
//!
//! While not connected, [`ConnectionSession::send`] appends to a FIFO
//! queue; the queued entry carries its own resolver and gets an id only
//! when flushed. On open the session sends one `getData`, then drains the
//! queue in order. On close every in-flight request is rejected with
//! [`ClientError::ConnectionClosed`]; queued entries wait for the next
//! connection.
//!
//! The session is transport-agnostic: outbound frames go to an
//! `mpsc::UnboundedSender<Vec<u8>>`, inbound frames are fed through
//! [`ConnectionSession::on_message`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Operation, ProtocolError, Response};
use crate::value::Document;

/// Client-side request errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Request timed out")]
    Timeout,
    #[error("Offline queue is full")]
    QueueFull,
    #[error("Server error: {0}")]
    Server(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Successful outcome of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Document returned by `getData`
    Value(Document),
    /// `put` / `delete` applied
    Success,
}

impl Reply {
    /// The returned document, if this reply carries one.
    pub fn into_document(self) -> Option<Document> {
        match self {
            Reply::Value(doc) => Some(doc),
            Reply::Success => None,
        }
    }
}

type Resolver = oneshot::Sender<Result<Reply, ClientError>>;

/// Operation issued while disconnected, waiting for the next connection.
struct PendingOperation {
    operation: Operation,
    resolver: Resolver,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shared secret attached to every request
    pub auth_token: String,
    /// Per-request timeout once sent (None = wait forever)
    pub request_timeout: Option<Duration>,
    /// Maximum operations held while disconnected
    pub max_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            request_timeout: Some(Duration::from_secs(30)),
            max_queue: 10_000,
        }
    }
}

struct SessionInner {
    state: ConnectionState,
    /// Last allocated request id; ids start at 1 and are never reused
    last_id: u64,
    outgoing: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Correlation table: request id → resolver
    in_flight: HashMap<u64, Resolver>,
    queue: VecDeque<PendingOperation>,
}

/// Future for the reply to one request.
///
/// Resolves when the matching response arrives, the request times out,
/// or the connection carrying it closes.
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Reply, ClientError>>,
}

impl Future for PendingReply {
    type Output = Result<Reply, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(ClientError::ConnectionClosed)))
    }
}

/// Correlation table plus offline queue for one client.
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<Mutex<SessionInner>>,
    config: Arc<SessionConfig>,
}

impl ConnectionSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                last_id: 0,
                outgoing: None,
                in_flight: HashMap::new(),
                queue: VecDeque::with_capacity(config.max_queue.min(1024)),
            })),
            config: Arc::new(config),
        }
    }

    /// Issue an operation, queueing it if not connected.
    ///
    /// The bookkeeping happens synchronously, so two calls made in order
    /// reach the wire in that order.
    pub fn send(&self, operation: Operation) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Connected {
            self.transmit(&mut inner, operation, tx);
        } else if inner.queue.len() >= self.config.max_queue {
            let _ = tx.send(Err(ClientError::QueueFull));
        } else {
            log::debug!("Queued {} while {:?}", operation.kind(), inner.state);
            inner.queue.push_back(PendingOperation {
                operation,
                resolver: tx,
            });
        }
        PendingReply { rx }
    }

    /// Allocate an id, record the resolver and hand the frame to the writer.
    fn transmit(&self, inner: &mut SessionInner, operation: Operation, resolver: Resolver) {
        inner.last_id += 1;
        let id = inner.last_id;
        let encoded = match operation.into_request(id, self.config.auth_token.as_str()).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = resolver.send(Err(e.into()));
                return;
            }
        };

        let sent = inner
            .outgoing
            .as_ref()
            .map(|tx| tx.send(encoded).is_ok())
            .unwrap_or(false);
        if !sent {
            let _ = resolver.send(Err(ClientError::ConnectionClosed));
            return;
        }

        inner.in_flight.insert(id, resolver);
        if let Some(timeout) = self.config.request_timeout {
            self.arm_timeout(id, timeout);
        }
    }

    fn arm_timeout(&self, id: u64, timeout: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("No runtime for request {id} timeout; it will wait indefinitely");
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = inner.lock().in_flight.remove(&id);
            if let Some(resolver) = expired {
                log::warn!("Request {id} timed out after {timeout:?}");
                let _ = resolver.send(Err(ClientError::Timeout));
            }
        });
    }

    /// Transition into `Connecting`.
    pub fn on_connecting(&self) {
        self.inner.lock().state = ConnectionState::Connecting;
    }

    /// Transition into `Connected`.
    ///
    /// Sends the initial `getData`, then flushes the offline queue in FIFO
    /// order. Returns the `getData` reply and the operations that were
    /// flushed behind it.
    pub fn on_open(&self, outgoing: mpsc::UnboundedSender<Vec<u8>>) -> (PendingReply, Vec<Operation>) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Connected;
        inner.outgoing = Some(outgoing);

        let (tx, rx) = oneshot::channel();
        self.transmit(&mut inner, Operation::GetData, tx);

        let queued: Vec<PendingOperation> = inner.queue.drain(..).collect();
        if !queued.is_empty() {
            log::info!("Replaying {} queued operations", queued.len());
        }
        let mut flushed = Vec::with_capacity(queued.len());
        for pending in queued {
            flushed.push(pending.operation.clone());
            self.transmit(&mut inner, pending.operation, pending.resolver);
        }

        (PendingReply { rx }, flushed)
    }

    /// Route one inbound frame to the request it answers.
    ///
    /// Returns an error for frames that could not be matched to a request
    /// and are worth reporting: undecodable frames and server errors
    /// without an id. Replies to unknown ids (already timed out, or
    /// foreign) are dropped.
    pub fn on_message(&self, bytes: &[u8]) -> Option<ClientError> {
        let response = match Response::decode(bytes) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Failed to decode response: {e}");
                return Some(e.into());
            }
        };

        let Some(id) = response.id() else {
            return match response {
                Response::Error { error, .. } => {
                    log::warn!("Server error without request id: {error}");
                    Some(ClientError::Server(error))
                }
                _ => {
                    log::debug!("Dropping response without id");
                    None
                }
            };
        };

        let Some(resolver) = self.inner.lock().in_flight.remove(&id) else {
            log::debug!("Ignoring late or unknown response {id}");
            return None;
        };

        let result = match response {
            Response::Value { value, .. } => Ok(Reply::Value(value)),
            Response::Success { .. } => Ok(Reply::Success),
            Response::Error { error, .. } => Err(ClientError::Server(error)),
        };
        let _ = resolver.send(result);
        None
    }

    /// Transition into `Disconnected`, failing every in-flight request.
    pub fn on_close(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Disconnected;
        inner.outgoing = None;
        let abandoned: Vec<Resolver> = inner.in_flight.drain().map(|(_, r)| r).collect();
        drop(inner);

        if !abandoned.is_empty() {
            log::warn!("Connection closed with {} requests in flight", abandoned.len());
        }
        for resolver in abandoned {
            let _ = resolver.send(Err(ClientError::ConnectionClosed));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Number of operations waiting for a connection.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Number of sent requests awaiting a response.
    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
