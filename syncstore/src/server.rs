//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!            ├── connection task ── Router ── Mutex<DocumentStore> ── file
//! Client B ──┘        (per socket)   (auth, dispatch)   (engine + save)
//! ```
//!
//! Every inbound binary frame is one request and gets exactly one binary
//! reply on the same socket. Failures while handling a frame become error
//! replies; the connection stays open.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::Response;
use crate::router::{PersistencePolicy, Router};
use crate::store::DocumentStore;
use crate::value::Document;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Backing file; `.rdb` selects the compressed binary layout
    pub file_path: PathBuf,
    /// Address to bind to
    pub bind_addr: String,
    /// Shared secret (None = generate one at startup)
    pub auth_token: Option<String>,
    /// How save failures are reported to clients
    pub persistence: PersistencePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            file_path: PathBuf::from("database.json"),
            bind_addr: "127.0.0.1:8080".to_string(),
            auth_token: None,
            persistence: PersistencePolicy::Silent,
        }
    }
}

impl ServerConfig {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Listen on all interfaces at `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr = format!("0.0.0.0:{port}");
        self
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_persistence(mut self, policy: PersistencePolicy) -> Self {
        self.persistence = policy;
        self
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub error_responses: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    error_responses: AtomicU64,
}

impl AtomicServerStats {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            error_responses: self.error_responses.load(Ordering::Relaxed),
        }
    }
}

/// Random 64-character hex token.
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    router: Router,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    /// Load the document and fix the auth token. Does not bind yet.
    pub fn new(config: ServerConfig) -> Self {
        let store = DocumentStore::open(&config.file_path);
        let auth_token = config.auth_token.clone().unwrap_or_else(generate_token);
        let router = Router::new(store, auth_token, config.persistence);
        Self {
            config,
            router,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.config.bind_addr).await
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = listener.local_addr()?;
        log::info!(
            "Sync server listening on {addr} (file: {})",
            self.config.file_path.display()
        );

        loop {
            let (stream, peer) = listener.accept().await?;
            log::debug!("New TCP connection from {peer}");

            let router = self.router.clone();
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, peer, router, stats).await {
                    log::error!("Connection error from {peer}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Router,
        stats: Arc<AtomicServerStats>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let result = async {
            while let Some(msg) = ws_receiver.next().await {
                let bytes: Vec<u8> = match msg {
                    Ok(Message::Binary(data)) => data.into(),
                    Ok(Message::Text(text)) => text.as_str().as_bytes().to_vec(),
                    Ok(Message::Ping(data)) => {
                        ws_sender.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("Connection closed from {addr}");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }
                };

                stats.total_messages.fetch_add(1, Ordering::Relaxed);
                let response = router.handle(&bytes).await;
                if response.is_error() {
                    stats.error_responses.fetch_add(1, Ordering::Relaxed);
                }
                let reply = match response.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        log::error!("Failed to encode response for {addr}: {e}");
                        Response::error(response.id(), e.to_string()).encode()?
                    }
                };
                ws_sender.send(Message::Binary(reply.into())).await?;
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }

    /// The shared secret clients must present.
    pub fn auth_token(&self) -> &str {
        self.router.auth_token()
    }

    /// Current document snapshot.
    pub async fn snapshot(&self) -> Document {
        self.router.snapshot().await
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.file_path, PathBuf::from("database.json"));
        assert!(config.auth_token.is_none());
        assert_eq!(config.persistence, PersistencePolicy::Silent);
    }

    #[test]
    fn test_with_port() {
        let config = ServerConfig::new("db.rdb").with_port(9000);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_generated_token() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_server_uses_configured_token() {
        let dir = tempdir().unwrap();
        let server = SyncServer::new(
            ServerConfig::new(dir.path().join("db.json")).with_auth_token("fixed"),
        );
        assert_eq!(server.auth_token(), "fixed");
    }

    #[tokio::test]
    async fn test_server_generates_token_when_absent() {
        let dir = tempdir().unwrap();
        let server = SyncServer::new(ServerConfig::new(dir.path().join("db.json")));
        assert_eq!(server.auth_token().len(), 64);
    }

    #[tokio::test]
    async fn test_server_loads_existing_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("db.json");
        std::fs::write(&file, r#"{ "key": "root_value" }"#).unwrap();

        let server = SyncServer::new(ServerConfig::new(&file));
        let doc = server.snapshot().await;
        assert_eq!(doc["key"], crate::value::Value::from("root_value"));
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let dir = tempdir().unwrap();
        let server = SyncServer::new(ServerConfig::new(dir.path().join("db.json")));
        let stats = server.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.error_responses, 0);
    }
}
