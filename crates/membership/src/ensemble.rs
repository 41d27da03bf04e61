//! In-process coordination service.
//!
//! Models the subset of a hierarchical coordination service the router
//! relies on: persistent and ephemeral nodes, per-parent sequence counters,
//! sessions that own ephemeral nodes, and child watches with an initial
//! snapshot. Every mutation and its watch notifications happen under one
//! lock, so watchers observe changes in the order they were applied.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, MutexGuard};

use crate::coordinator::{ChildData, ChildEvent, ChildWatch, Coordinator};
use crate::{Error, Result};

const DEFAULT_WATCH_CAPACITY: usize = 64;

/// Identity of a client session.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    owner: Option<SessionId>,
    next_sequence: u64,
}

impl Node {
    fn persistent() -> Self {
        Self {
            data: Vec::new(),
            owner: None,
            next_sequence: 0,
        }
    }
}

#[derive(Debug)]
struct Watcher {
    parent: String,
    tx: mpsc::Sender<ChildEvent>,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    closed_sessions: HashSet<SessionId>,
    watchers: Vec<Watcher>,
}

impl State {
    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> Vec<ChildData> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(child, _)| child.starts_with(&prefix))
            .filter(|(child, _)| {
                child.len() > prefix.len() && !child[prefix.len()..].contains('/')
            })
            .map(|(child, node)| ChildData {
                path: child.clone(),
                data: node.data.clone(),
            })
            .collect()
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .find(|(child, _)| child.len() > prefix.len())
            .is_some_and(|(child, _)| child.starts_with(&prefix))
    }

    /// Delivers `event` to every watcher of `parent`, dropping closed ones.
    ///
    /// Sends wait for channel capacity while the state lock is held, which
    /// keeps delivery order equal to mutation order.
    async fn notify(&mut self, parent: &str, event: ChildEvent) {
        let mut closed = Vec::new();
        for (idx, watcher) in self.watchers.iter().enumerate() {
            if watcher.parent != parent {
                continue;
            }
            if watcher.tx.send(event.clone()).await.is_err() {
                closed.push(idx);
            }
        }
        for idx in closed.into_iter().rev() {
            self.watchers.swap_remove(idx);
        }
    }

    async fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_some() {
            let parent = parent_of(path).unwrap_or("/").to_string();
            self.notify(&parent, ChildEvent::Removed(path.to_string())).await;
        }
    }
}

fn validate(path: &str) -> Result<()> {
    let well_formed = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if well_formed {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/')? {
        0 if path.len() > 1 => Some("/"),
        0 => None,
        idx => Some(&path[..idx]),
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

/// A coordination service living inside this process.
///
/// Cheap to clone; clones share state. Clients talk to it through
/// [`LocalSession`]s obtained from [`connect`](Self::connect).
#[derive(Clone, Debug)]
pub struct LocalEnsemble {
    state: Arc<Mutex<State>>,
    next_session: Arc<AtomicU64>,
    watch_capacity: usize,
}

impl Default for LocalEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEnsemble {
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Bounds each watch channel to `capacity` undelivered events.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            next_session: Arc::new(AtomicU64::new(1)),
            watch_capacity: capacity.max(1),
        }
    }

    /// Opens a new session.
    pub fn connect(&self) -> LocalSession {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(session = %id, "Session opened");
        LocalSession {
            ensemble: self.clone(),
            id,
        }
    }

    /// Ends `session`, deleting every ephemeral node it owns.
    ///
    /// This is what happens when a client crashes or its session times out:
    /// watchers see ordinary removal events.
    pub async fn expire_session(&self, session: SessionId) {
        let mut state = self.state.lock().await;
        if !state.closed_sessions.insert(session) {
            return;
        }

        let owned: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &owned {
            state.remove_node(path).await;
        }
        tracing::info!(%session, removed = owned.len(), "Session expired");
    }

    /// Paths of the current children of `path`, sorted.
    pub async fn children(&self, path: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state.children(path).into_iter().map(|c| c.path).collect()
    }
}

/// A client session on a [`LocalEnsemble`].
///
/// Ephemeral nodes created through a session are deleted when the session is
/// closed or expired. Operations on a closed session fail with
/// [`Error::SessionClosed`].
#[derive(Clone, Debug)]
pub struct LocalSession {
    ensemble: LocalEnsemble,
    id: SessionId,
}

impl LocalSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ensemble(&self) -> &LocalEnsemble {
        &self.ensemble
    }

    /// Closes the session, releasing its ephemeral nodes.
    pub async fn close(&self) {
        self.ensemble.expire_session(self.id).await;
    }

    async fn lock_live(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.ensemble.state.lock().await;
        if state.closed_sessions.contains(&self.id) {
            Err(Error::SessionClosed(self.id.0))
        } else {
            Ok(state)
        }
    }
}

#[async_trait]
impl Coordinator for LocalSession {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        validate(path)?;
        let mut state = self.lock_live().await?;

        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(p) = current {
            if state.exists(p) {
                break;
            }
            missing.push(p.to_string());
            current = parent_of(p);
        }

        for p in missing.into_iter().rev() {
            state.nodes.insert(p.clone(), Node::persistent());
            let parent = parent_of(&p).unwrap_or("/").to_string();
            let event = ChildEvent::Added(ChildData {
                path: p,
                data: Vec::new(),
            });
            state.notify(&parent, event).await;
        }
        Ok(())
    }

    async fn create_ephemeral_sequential(
        &self,
        path_prefix: &str,
        payload: &[u8],
    ) -> Result<String> {
        validate(path_prefix)?;
        let parent = parent_of(path_prefix)
            .ok_or_else(|| Error::InvalidPath(path_prefix.to_string()))?
            .to_string();

        let mut state = self.lock_live().await?;
        let sequence = if parent == "/" {
            // The root is implicit; give it a counter on first use.
            state
                .nodes
                .entry("/".to_string())
                .or_insert_with(Node::persistent)
        } else {
            state
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| Error::NoNode(parent.clone()))?
        };
        let seq = sequence.next_sequence;
        sequence.next_sequence += 1;

        let path = format!("{}{:010}", path_prefix, seq);
        state.nodes.insert(
            path.clone(),
            Node {
                data: payload.to_vec(),
                owner: Some(self.id),
                next_sequence: 0,
            },
        );
        let event = ChildEvent::Added(ChildData {
            path: path.clone(),
            data: payload.to_vec(),
        });
        state.notify(&parent, event).await;

        Ok(path)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;
        let mut state = self.lock_live().await?;
        if !state.nodes.contains_key(path) || path == "/" {
            return Err(Error::NoNode(path.to_string()));
        }
        if state.has_children(path) {
            return Err(Error::NotEmpty(path.to_string()));
        }
        state.remove_node(path).await;
        Ok(())
    }

    async fn watch_children(&self, path: &str) -> Result<ChildWatch> {
        validate(path)?;
        let mut state = self.lock_live().await?;
        if !state.exists(path) {
            return Err(Error::NoNode(path.to_string()));
        }

        let initial = state.children(path);
        let (tx, events) = mpsc::channel(self.ensemble.watch_capacity);
        state.watchers.push(Watcher {
            parent: path.to_string(),
            tx,
        });
        Ok(ChildWatch { initial, events })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/services/api"), Some("/services"));
        assert_eq!(parent_of("/services"), Some("/"));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn test_validate() {
        assert!(validate("/services/api").is_ok());
        assert!(validate("/").is_ok());
        assert!(validate("services").is_err());
        assert!(validate("/services/").is_err());
        assert!(validate("/a//b").is_err());
    }

    #[tokio::test]
    async fn test_ensure_path_is_idempotent() {
        let ensemble = LocalEnsemble::new();
        let session = ensemble.connect();

        session.ensure_path("/services/api").await.unwrap();
        session.ensure_path("/services/api").await.unwrap();

        assert_eq!(ensemble.children("/").await, vec!["/services".to_string()]);
        assert_eq!(
            ensemble.children("/services").await,
            vec!["/services/api".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sequential_names_are_zero_padded_and_increasing() {
        let ensemble = LocalEnsemble::new();
        let session = ensemble.connect();
        session.ensure_path("/services/api").await.unwrap();

        let first = session
            .create_ephemeral_sequential("/services/api/instance-", b"{}")
            .await
            .unwrap();
        let second = session
            .create_ephemeral_sequential("/services/api/instance-", b"{}")
            .await
            .unwrap();

        assert_eq!(first, "/services/api/instance-0000000000");
        assert_eq!(second, "/services/api/instance-0000000001");
    }

    #[tokio::test]
    async fn test_sequence_survives_deletion() {
        let ensemble = LocalEnsemble::new();
        let session = ensemble.connect();
        session.ensure_path("/ns").await.unwrap();

        let first = session.create_ephemeral_sequential("/ns/n-", b"").await.unwrap();
        session.delete(&first).await.unwrap();
        let second = session.create_ephemeral_sequential("/ns/n-", b"").await.unwrap();

        assert_eq!(second, "/ns/n-0000000001", "sequence numbers are never reused");
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let session = LocalEnsemble::new().connect();
        let err = session
            .create_ephemeral_sequential("/missing/instance-", b"")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoNode(p) if p == "/missing"));
    }

    #[tokio::test]
    async fn test_delete_missing_and_non_empty() {
        let session = LocalEnsemble::new().connect();
        session.ensure_path("/a/b").await.unwrap();

        assert!(matches!(session.delete("/a/c").await, Err(Error::NoNode(_))));
        assert!(matches!(session.delete("/a").await, Err(Error::NotEmpty(_))));
        session.delete("/a/b").await.unwrap();
        session.delete("/a").await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_snapshot_then_events() {
        let ensemble = LocalEnsemble::new();
        let owner = ensemble.connect();
        let watcher = ensemble.connect();
        owner.ensure_path("/ns").await.unwrap();

        let existing = owner.create_ephemeral_sequential("/ns/n-", b"a").await.unwrap();
        let mut watch = watcher.watch_children("/ns").await.unwrap();
        assert_eq!(
            watch.initial,
            vec![ChildData {
                path: existing.clone(),
                data: b"a".to_vec()
            }]
        );

        let added = owner.create_ephemeral_sequential("/ns/n-", b"b").await.unwrap();
        owner.delete(&existing).await.unwrap();

        assert_eq!(
            watch.events.recv().await,
            Some(ChildEvent::Added(ChildData {
                path: added,
                data: b"b".to_vec()
            }))
        );
        assert_eq!(watch.events.recv().await, Some(ChildEvent::Removed(existing)));
    }

    #[tokio::test]
    async fn test_watch_only_sees_direct_children() {
        let ensemble = LocalEnsemble::new();
        let session = ensemble.connect();
        session.ensure_path("/ns").await.unwrap();
        let mut watch = session.watch_children("/ns").await.unwrap();

        session.ensure_path("/ns/sub/deeper").await.unwrap();

        match watch.events.recv().await {
            Some(ChildEvent::Added(child)) => assert_eq!(child.path, "/ns/sub"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(watch.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_session_drops_its_ephemerals() {
        let ensemble = LocalEnsemble::new();
        let doomed = ensemble.connect();
        let survivor = ensemble.connect();
        survivor.ensure_path("/ns").await.unwrap();

        let gone = doomed.create_ephemeral_sequential("/ns/n-", b"").await.unwrap();
        let kept = survivor.create_ephemeral_sequential("/ns/n-", b"").await.unwrap();
        let mut watch = survivor.watch_children("/ns").await.unwrap();

        ensemble.expire_session(doomed.id()).await;

        assert_eq!(watch.events.recv().await, Some(ChildEvent::Removed(gone)));
        assert_eq!(ensemble.children("/ns").await, vec![kept]);
        assert!(matches!(
            doomed.ensure_path("/other").await,
            Err(Error::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_watch_is_pruned() {
        let ensemble = LocalEnsemble::with_watch_capacity(1);
        let session = ensemble.connect();
        session.ensure_path("/ns").await.unwrap();

        let watch = session.watch_children("/ns").await.unwrap();
        drop(watch);

        // Would block forever on a full channel if the closed watcher were kept.
        for _ in 0..3 {
            session.create_ephemeral_sequential("/ns/n-", b"").await.unwrap();
        }
        assert_eq!(ensemble.children("/ns").await.len(), 3);
    }
}
