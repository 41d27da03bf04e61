use std::sync::Arc;

use corelib::{HashRing, InstanceId, InstanceResolver, ServiceInstance};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{ChildData, ChildEvent, Coordinator};
use crate::registry::{decode_instance, instance_id_from_path};
use crate::Result;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Membership change event.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipEvent {
    Joined(ServiceInstance),
    Left(InstanceId),
}

/// Keeps a hash ring in step with the instances registered under a namespace.
///
/// The ring is seeded from the namespace's children at start, then updated
/// by a background task reading the child watch. Routing reads the ring
/// directly and never waits on that task.
pub struct MembershipSync {
    namespace: String,
    ring: Arc<HashRing<ServiceInstance>>,
    cancel_token: CancellationToken,
    watch_handle: Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<MembershipEvent>,
}

impl MembershipSync {
    /// Start tracking the instances under `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be created or watched.
    /// Individual malformed entries are logged and skipped.
    pub async fn start(coordinator: Arc<dyn Coordinator>, namespace: &str) -> Result<Self> {
        coordinator.ensure_path(namespace).await?;
        let watch = coordinator.watch_children(namespace).await?;

        let ring = Arc::new(HashRing::new());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        for child in watch.initial {
            Self::apply_added(&ring, &event_tx, child);
        }
        tracing::info!(
            namespace,
            count = ring.size(),
            "Membership initialized"
        );

        let cancel_token = CancellationToken::new();
        let watch_handle = Self::spawn_watch_task(
            namespace.to_string(),
            watch.events,
            ring.clone(),
            cancel_token.clone(),
            event_tx.clone(),
        );

        Ok(Self {
            namespace: namespace.to_string(),
            ring,
            cancel_token,
            watch_handle: Mutex::new(Some(watch_handle)),
            event_tx,
        })
    }

    fn spawn_watch_task(
        namespace: String,
        mut events: mpsc::Receiver<ChildEvent>,
        ring: Arc<HashRing<ServiceInstance>>,
        cancel_token: CancellationToken,
        event_tx: broadcast::Sender<MembershipEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        break;
                    }
                    event = events.recv() => {
                        match event {
                            Some(ChildEvent::Added(child)) => {
                                Self::apply_added(&ring, &event_tx, child);
                            }
                            Some(ChildEvent::Removed(path)) => {
                                Self::apply_removed(&ring, &event_tx, &path);
                            }
                            None => {
                                tracing::warn!(namespace = %namespace, "Child watch closed");
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!(namespace = %namespace, "Membership watch task shutting down");
        })
    }

    fn apply_added(
        ring: &HashRing<ServiceInstance>,
        event_tx: &broadcast::Sender<MembershipEvent>,
        child: ChildData,
    ) {
        let instance = match decode_instance(&child.path, &child.data) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(path = %child.path, "Skipping registry entry: {}", e);
                return;
            }
        };

        ring.add(&instance.node_key(), instance.clone());
        tracing::info!(
            id = %instance.id,
            address = %instance.address(),
            count = ring.size(),
            "Instance joined"
        );
        let _ = event_tx.send(MembershipEvent::Joined(instance));
    }

    fn apply_removed(
        ring: &HashRing<ServiceInstance>,
        event_tx: &broadcast::Sender<MembershipEvent>,
        path: &str,
    ) {
        let id = match instance_id_from_path(path) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(path, "Ignoring removal: {}", e);
                return;
            }
        };

        ring.remove(&id.node_key());
        tracing::info!(%id, count = ring.size(), "Instance left");
        let _ = event_tx.send(MembershipEvent::Left(id));
    }

    /// Instance owning `key` in the current ring.
    pub fn resolve(&self, key: &str) -> Option<ServiceInstance> {
        self.ring.lookup(key)
    }

    /// Shared handle to the ring this synchronizer maintains.
    pub fn ring(&self) -> Arc<HashRing<ServiceInstance>> {
        self.ring.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.ring.size()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Subscribe to membership change events.
    ///
    /// Events are broadcast AFTER the ring has been updated.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.event_tx.subscribe()
    }

    /// Stop applying membership changes and drop the child watch.
    ///
    /// Calling this more than once is harmless.
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        let handle = self.watch_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            tracing::info!(namespace = %self.namespace, "Membership sync stopped");
        }
    }
}

impl InstanceResolver for MembershipSync {
    fn resolve(&self, key: &str) -> Option<ServiceInstance> {
        MembershipSync::resolve(self, key)
    }
}

impl Drop for MembershipSync {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
