use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// A child entry and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildData {
    pub path: String,
    pub data: Vec<u8>,
}

/// Change to the children of a watched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Added(ChildData),
    Removed(String),
}

/// Subscription to the children of one path.
///
/// `initial` is the set of children at subscription time; `events` carries
/// every change after it, in the order the coordination service applied
/// them. Dropping the receiver ends the subscription.
#[derive(Debug)]
pub struct ChildWatch {
    pub initial: Vec<ChildData>,
    pub events: mpsc::Receiver<ChildEvent>,
}

/// What the router needs from a coordination service.
///
/// Paths are absolute and `/`-separated. Ephemeral entries belong to the
/// session that created them and disappear with it.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Creates `path` and any missing parents. Existing nodes are left alone.
    async fn ensure_path(&self, path: &str) -> Result<()>;

    /// Creates an ephemeral entry named `path_prefix` followed by a zero-padded
    /// sequence number and returns the created path.
    async fn create_ephemeral_sequential(&self, path_prefix: &str, payload: &[u8])
        -> Result<String>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Snapshot of the children of `path` plus a stream of later changes.
    async fn watch_children(&self, path: &str) -> Result<ChildWatch>;
}
