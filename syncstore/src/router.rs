//! Server-side request handling: authenticate, dispatch, persist, reply.
//!
//! ```text
//! bytes ─► decode ─► token check ─► operation ─► engine ─► store.save ─► Response
//!            │            │              │
//!            └────────────┴──────────────┴──► Response::Error (connection stays open)
//! ```
//!
//! The store sits behind a single async mutex, so each
//! get / put+save / delete+save sequence runs atomically with respect to
//! every other connection. The file write itself runs on the blocking
//! pool while the mutex is held, so saves land in mutation order without
//! stalling runtime workers.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::engine;
use crate::protocol::{
    Operation, ProtocolError, Request, Response, UNAUTHORIZED, UNKNOWN_MESSAGE_TYPE,
};
use crate::store::{DocumentStore, StoreError};
use crate::value::Document;

/// What to do when saving after a mutation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistencePolicy {
    /// Log the failure and still report success. The client may then
    /// believe a write is durable when it is only in memory.
    #[default]
    Silent,
    /// Reply with an error carrying the store error text. The mutation
    /// remains applied in memory.
    Surface,
}

/// Authenticates and dispatches decoded requests against the store.
#[derive(Clone)]
pub struct Router {
    store: Arc<Mutex<DocumentStore>>,
    auth_token: Arc<str>,
    persistence: PersistencePolicy,
}

impl Router {
    pub fn new(store: DocumentStore, auth_token: impl Into<String>, persistence: PersistencePolicy) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            auth_token: Arc::from(auth_token.into()),
            persistence,
        }
    }

    /// Handle one raw inbound message.
    pub async fn handle(&self, bytes: &[u8]) -> Response {
        match Request::decode(bytes) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                log::warn!("Failed to decode request: {e}");
                Response::error(None, e.to_string())
            }
        }
    }

    /// Handle one decoded request.
    pub async fn dispatch(&self, request: Request) -> Response {
        let id = request.id;
        if request.token.as_str() != &*self.auth_token {
            log::warn!("Rejected request {id:?}: bad token");
            return Response::error(id, UNAUTHORIZED);
        }

        let operation = match request.operation() {
            Ok(op) => op,
            Err(ProtocolError::UnknownMessageType(kind)) => {
                log::debug!("Unknown message type {kind:?}");
                return Response::error(id, UNKNOWN_MESSAGE_TYPE);
            }
            Err(e) => return Response::error(id, e.to_string()),
        };

        let mut store = self.store.lock().await;
        match operation {
            Operation::GetData => Response::Value {
                id,
                value: engine::get(store.document()),
            },
            Operation::Put { path, value } => {
                if let Err(e) = engine::put(store.document_mut(), &path, value) {
                    return Response::error(id, e.to_string());
                }
                log::debug!("put {path:?}");
                self.persist(&store, id).await
            }
            Operation::Delete { path } => {
                match engine::delete(store.document_mut(), &path) {
                    Ok(removed) => log::debug!("delete {path:?} (removed: {removed})"),
                    Err(e) => return Response::error(id, e.to_string()),
                }
                self.persist(&store, id).await
            }
        }
    }

    async fn persist(&self, store: &DocumentStore, id: Option<u64>) -> Response {
        match Self::save(store).await {
            Ok(()) => Response::Success { id },
            Err(e) => {
                log::error!("Error saving document to {}: {e}", store.path().display());
                match self.persistence {
                    PersistencePolicy::Silent => Response::Success { id },
                    PersistencePolicy::Surface => Response::error(id, e.to_string()),
                }
            }
        }
    }

    async fn save(store: &DocumentStore) -> Result<(), StoreError> {
        let prepared = store.prepare_save()?;
        tokio::task::spawn_blocking(move || prepared.write())
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    /// Current document snapshot.
    pub async fn snapshot(&self) -> Document {
        engine::get(self.store.lock().await.document())
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn persistence(&self) -> PersistencePolicy {
        self.persistence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{path, Value};
    use tempfile::tempdir;

    const TOKEN: &str = "secret";

    fn router_at(dir: &std::path::Path, policy: PersistencePolicy) -> Router {
        Router::new(DocumentStore::open(dir.join("db.json")), TOKEN, policy)
    }

    fn put(id: u64, keys: &[&str], value: Value) -> Request {
        Operation::Put {
            path: path(keys),
            value,
        }
        .into_request(id, TOKEN)
    }

    #[tokio::test]
    async fn test_put_then_get_data() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Silent);

        let resp = router.dispatch(put(1, &["a", "b"], Value::Int(1))).await;
        assert_eq!(resp, Response::Success { id: Some(1) });

        let resp = router.dispatch(Operation::GetData.into_request(2, TOKEN)).await;
        match resp {
            Response::Value { id, value } => {
                assert_eq!(id, Some(2));
                assert_eq!(engine::get_at(&value, &path(&["a", "b"])), Some(&Value::Int(1)));
            }
            other => panic!("expected value response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mutation_is_persisted() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Silent);
        router.dispatch(put(1, &["k"], Value::from("v"))).await;

        let reloaded = DocumentStore::open(dir.path().join("db.json"));
        assert_eq!(reloaded.document(), &router.snapshot().await);
    }

    #[tokio::test]
    async fn test_wrong_token_never_mutates() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Silent);
        router.dispatch(put(1, &["k"], Value::Int(1))).await;
        let before = router.snapshot().await;

        let mut req = put(2, &["k"], Value::Int(2));
        req.token = "wrong".into();
        let resp = router.dispatch(req).await;

        assert_eq!(resp, Response::error(Some(2), UNAUTHORIZED));
        assert_eq!(router.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Silent);
        let req = Request {
            msg_type: "rename".into(),
            id: Some(5),
            token: TOKEN.into(),
            path: None,
            value: None,
        };
        assert_eq!(
            router.dispatch(req).await,
            Response::error(Some(5), UNKNOWN_MESSAGE_TYPE)
        );
    }

    #[tokio::test]
    async fn test_delete_missing_reports_success() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Silent);
        let del = || Operation::Delete { path: path(&["nope", "x"]) }.into_request(1, TOKEN);

        assert_eq!(router.dispatch(del()).await, Response::Success { id: Some(1) });
        assert_eq!(router.dispatch(del()).await, Response::Success { id: Some(1) });
        assert!(router.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Silent);
        let resp = router.dispatch(put(1, &[], Value::Int(1))).await;
        assert_eq!(resp, Response::error(Some(1), "Path must not be empty"));
    }

    #[tokio::test]
    async fn test_garbage_bytes_yield_error_response() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Silent);
        let reply = router.handle(&[0xFF, 0xFE, 0xFD]).await;
        assert!(matches!(reply, Response::Error { id: None, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_puts_all_persisted() {
        let dir = tempdir().unwrap();
        let router = router_at(dir.path(), PersistencePolicy::Surface);

        let tasks: Vec<_> = (0..16u64)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    let key = format!("k{i}");
                    router.dispatch(put(i, &[key.as_str()], Value::Int(i as i64))).await
                })
            })
            .collect();
        for task in tasks {
            assert!(!task.await.unwrap().is_error());
        }

        let reloaded = DocumentStore::open(dir.path().join("db.json"));
        assert_eq!(reloaded.document().len(), 16);
        assert_eq!(reloaded.document(), &router.snapshot().await);
    }

    #[tokio::test]
    async fn test_save_failure_silent_by_default() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("missing_dir").join("db.json");
        let router = Router::new(DocumentStore::open(&file), TOKEN, PersistencePolicy::Silent);

        let resp = router.dispatch(put(1, &["k"], Value::Int(1))).await;
        assert_eq!(resp, Response::Success { id: Some(1) });
        // Applied in memory even though the save failed
        assert_eq!(router.snapshot().await["k"], Value::Int(1));
    }

    #[tokio::test]
    async fn test_save_failure_surfaced_when_configured() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("missing_dir").join("db.json");
        let router = Router::new(DocumentStore::open(&file), TOKEN, PersistencePolicy::Surface);

        let resp = router.dispatch(put(1, &["k"], Value::Int(1))).await;
        assert!(resp.is_error());
        assert_eq!(resp.id(), Some(1));
        assert_eq!(router.snapshot().await["k"], Value::Int(1));
    }
}
