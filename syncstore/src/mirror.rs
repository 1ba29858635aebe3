//! Client-side replica of the server document.
//!
//! [`Mirror`] holds the local copy. [`View`] is a handle onto one
//! location inside it: reads resolve against the local copy, writes update
//! the local copy and are forwarded to the server as full-root-path
//! requests.
//!
//! ```text
//! client.database()            View []
//!   .view("array")             View ["array"]
//!   .set("key", "v")           local put ["array","key"]  +  put request
//!   .delete("key")             delete request  ──ok──►  local delete
//! ```
//!
//! While the initial snapshot after a (re)connect is in flight, local
//! mutations are also recorded and replayed over the snapshot once it
//! lands, so edits made offline or during the load are not clobbered.
//!
//! A local put and the request carrying it are issued under the mirror's
//! write lock ([`Mirror::apply_put_and_send`]). A load therefore starts
//! either before the put (which is then recorded) or after it (which is
//! then queued and comes back through [`Mirror::replay_first`]).

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::client::SyncClient;
use crate::engine;
use crate::protocol::Operation;
use crate::session::{ClientError, PendingReply, Reply};
use crate::value::{Document, Path, Value};

#[derive(Default)]
struct MirrorState {
    doc: Document,
    /// Some while a snapshot load is pending
    replay: Option<Vec<Operation>>,
}

/// Local document replica shared by all views of one client.
#[derive(Clone, Default)]
pub struct Mirror {
    state: Arc<RwLock<MirrorState>>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value at `path`, cloned.
    pub fn get(&self, path: &[String]) -> Option<Value> {
        engine::get_at(&self.state.read().doc, path).cloned()
    }

    /// Copy of the whole local document.
    pub fn snapshot(&self) -> Document {
        self.state.read().doc.clone()
    }

    pub fn apply_put(&self, path: &[String], value: Value) {
        Self::put_locked(&mut self.state.write(), path, value);
    }

    /// Apply a put locally and hand the matching operation to `send`
    /// without releasing the lock in between.
    ///
    /// `send` must not call back into this mirror.
    pub fn apply_put_and_send<R>(
        &self,
        path: &[String],
        value: Value,
        send: impl FnOnce(Operation) -> R,
    ) -> R {
        let mut state = self.state.write();
        Self::put_locked(&mut state, path, value.clone());
        send(Operation::Put {
            path: path.to_vec(),
            value,
        })
    }

    fn put_locked(state: &mut MirrorState, path: &[String], value: Value) {
        if let Some(replay) = state.replay.as_mut() {
            replay.push(Operation::Put {
                path: path.to_vec(),
                value: value.clone(),
            });
        }
        if let Err(e) = engine::put(&mut state.doc, path, value) {
            log::warn!("Ignoring local put: {e}");
        }
    }

    pub fn apply_delete(&self, path: &[String]) {
        let mut state = self.state.write();
        if let Some(replay) = state.replay.as_mut() {
            replay.push(Operation::Delete {
                path: path.to_vec(),
            });
        }
        if let Err(e) = engine::delete(&mut state.doc, path) {
            log::warn!("Ignoring local delete: {e}");
        }
    }

    /// Start recording local mutations until [`Mirror::finish_load`].
    pub fn begin_load(&self) {
        let mut state = self.state.write();
        if state.replay.is_none() {
            state.replay = Some(Vec::new());
        }
    }

    /// Put mutations that were applied locally before the load started,
    /// and that the server will only see after its snapshot, ahead of
    /// everything recorded so far.
    pub fn replay_first(&self, pending: Vec<Operation>) {
        let mut state = self.state.write();
        if let Some(replay) = state.replay.as_mut() {
            replay.splice(0..0, pending);
        }
    }

    /// Install a server snapshot and replay recorded mutations over it.
    /// With `None` (load failed) the local copy is kept as is.
    pub fn finish_load(&self, snapshot: Option<Document>) {
        let mut state = self.state.write();
        let replay = state.replay.take().unwrap_or_default();
        let Some(mut doc) = snapshot else {
            return;
        };
        for op in replay {
            let result = match op {
                Operation::Put { path, value } => engine::put(&mut doc, &path, value),
                Operation::Delete { path } => engine::delete(&mut doc, &path).map(|_| ()),
                Operation::GetData => Ok(()),
            };
            if let Err(e) = result {
                log::warn!("Skipping replayed mutation: {e}");
            }
        }
        state.doc = doc;
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().replay.is_some()
    }
}

/// What a key holds, as seen through a [`View`].
#[derive(Clone)]
pub enum Entry {
    /// A container: descend with another view
    View(View),
    /// A leaf value
    Value(Value),
}

impl Entry {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::View(_) => None,
        }
    }

    pub fn into_view(self) -> Option<View> {
        match self {
            Entry::View(v) => Some(v),
            Entry::Value(_) => None,
        }
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entry::View(v) => f.debug_tuple("View").field(&v.path).finish(),
            Entry::Value(v) => f.debug_tuple("Value").field(v).finish(),
        }
    }
}

/// Handle onto one location of a client's mirrored document.
#[derive(Clone)]
pub struct View {
    client: SyncClient,
    path: Path,
}

impl View {
    pub(crate) fn new(client: SyncClient, path: Path) -> Self {
        Self { client, path }
    }

    /// Path from the document root to this view.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    fn child_path(&self, key: &str) -> Path {
        let mut path = self.path.clone();
        path.push(key.to_string());
        path
    }

    /// Read `key`: containers come back as nested views, leaves as values.
    pub fn get(&self, key: &str) -> Option<Entry> {
        let path = self.child_path(key);
        match self.client.mirror().get(&path)? {
            Value::Map(_) => Some(Entry::View(View::new(self.client.clone(), path))),
            leaf => Some(Entry::Value(leaf)),
        }
    }

    /// Read `key` as a plain value (containers included).
    pub fn value(&self, key: &str) -> Option<Value> {
        self.client.mirror().get(&self.child_path(key))
    }

    /// View onto `key`, whether or not it exists yet.
    pub fn view(&self, key: &str) -> View {
        View::new(self.client.clone(), self.child_path(key))
    }

    /// Write `key` locally and send the put in the background.
    /// Failures go to the client's error sink.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let pending = self.put(key, value);
        self.client
            .detach("sending put", async move { pending.await.map(|_| ()) });
    }

    /// Like [`View::set`], but hands back the server's reply.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> PendingReply {
        let path = self.child_path(key);
        self.client
            .mirror()
            .apply_put_and_send(&path, value.into(), |op| self.client.send(op))
    }

    /// Delete `key` on the server in the background; the local entry is
    /// removed only once the server confirms.
    pub fn delete(&self, key: &str) {
        self.client.delete(self.child_path(key));
    }

    /// Like [`View::delete`], but hands back the server's reply. The
    /// request is issued immediately; awaiting only observes the outcome.
    pub fn remove(&self, key: &str) -> impl Future<Output = Result<Reply, ClientError>> {
        self.client.delete_confirmed(self.child_path(key))
    }

    /// Keys present at this location (empty if it is not a container).
    pub fn keys(&self) -> Vec<String> {
        self.snapshot()
            .map(|doc| doc.into_keys().collect())
            .unwrap_or_default()
    }

    /// Copy of the container at this location.
    pub fn snapshot(&self) -> Option<Document> {
        if self.path.is_empty() {
            return Some(self.client.mirror().snapshot());
        }
        match self.client.mirror().get(&self.path)? {
            Value::Map(doc) => Some(doc),
            _ => None,
        }
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View").field("path", &self.path).finish()
    }
}
