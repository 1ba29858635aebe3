//! # syncstore: Real-time synchronized key-value store
//!
//! A server holds an authoritative nested document persisted to a single
//! file; clients keep a mirrored copy and forward local writes to the
//! server over one WebSocket connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │   bincode frames    │ (central)   │
//! └──────┬──────┘                     └──────┬──────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌─────────────┐                     ┌─────────────┐
//! │ Mirror/View │                     │ Router      │
//! │ (replica)   │                     │ (auth)      │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴───────┐
//!                                    │ DocumentStore │
//!                                    │ (.rdb / json) │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`value`]: Document data model
//! - [`engine`]: Path-addressed get/put/delete with auto-vivification
//! - [`store`]: File persistence (LZ4 binary or pretty JSON)
//! - [`protocol`]: Wire messages (bincode)
//! - [`router`]: Server-side authentication and dispatch
//! - [`server`]: WebSocket server
//! - [`session`]: Request correlation, offline queue, timeouts
//! - [`client`]: WebSocket client with reconnect
//! - [`mirror`]: Client-side replica and path views
//!
//! ## Example
//!
//! ```no_run
//! use syncstore::{ClientConfig, ServerConfig, SyncClient, SyncServer};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let server = SyncServer::new(ServerConfig::new("./database.rdb").with_port(8080));
//! let token = server.auth_token().to_string();
//! tokio::spawn(async move { server.run().await });
//!
//! let client = SyncClient::new(ClientConfig::new("ws://localhost:8080", token));
//! client.connect();
//!
//! let database = client.database();
//! database.set("array", syncstore::Value::map());
//! database.view("array").set("key", "nested_value");
//! database.set("key", "root_value");
//! # Ok(())
//! # }
//! ```

pub mod value;
pub mod engine;
pub mod store;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod client;
pub mod mirror;

// Re-exports for convenience
pub use value::{path, Document, Path, Value};
pub use engine::PathError;
pub use store::{DocumentStore, FileFormat, PreparedSave, StoreError};
pub use protocol::{Operation, ProtocolError, Request, Response};
pub use router::{PersistencePolicy, Router};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{
    ClientError, ConnectionSession, ConnectionState, PendingReply, Reply, SessionConfig,
};
pub use client::{ClientConfig, ErrorSink, LogErrorSink, SyncClient, SyncEvent};
pub use mirror::{Entry, Mirror, View};
