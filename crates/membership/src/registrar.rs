use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use corelib::InstanceId;

use crate::coordinator::Coordinator;
use crate::registry::{encode_payload, instance_id_from_path};
use crate::Result;

const INSTANCE_PREFIX: &str = "instance-";

/// Registers the local instance under a service namespace.
///
/// The entry is ephemeral: if the process dies without calling `stop`, the
/// coordination service removes it when the session ends.
pub struct SelfRegistrar {
    coordinator: Arc<dyn Coordinator>,
    instance_id: InstanceId,
    path: String,
    registered: AtomicBool,
}

impl SelfRegistrar {
    /// Creates the `{namespace}/instance-<sequence>` entry for `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordination service rejects the namespace or
    /// the entry, or if the returned path carries no sequence number.
    pub async fn start(
        coordinator: Arc<dyn Coordinator>,
        namespace: &str,
        host: &str,
        port: u16,
    ) -> Result<Self> {
        coordinator.ensure_path(namespace).await?;

        let payload = encode_payload(host, port)?;
        let prefix = format!("{}/{}", namespace.trim_end_matches('/'), INSTANCE_PREFIX);
        let path = coordinator
            .create_ephemeral_sequential(&prefix, &payload)
            .await?;
        let instance_id = instance_id_from_path(&path)?;

        tracing::info!(
            %instance_id,
            path = %path,
            address = %format!("{}:{}", host, port),
            "Registered instance"
        );

        Ok(Self {
            coordinator,
            instance_id,
            path,
            registered: AtomicBool::new(true),
        })
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Path of the entry created at start.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// False once `stop` has run, whether or not the delete succeeded.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Deletes the registry entry. Failures are logged, not returned.
    pub async fn stop(&self) {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return;
        }

        match self.coordinator.delete(&self.path).await {
            Ok(()) => {
                tracing::info!(instance_id = %self.instance_id, "Deregistered instance");
            }
            Err(e) => {
                tracing::warn!(
                    instance_id = %self.instance_id,
                    path = %self.path,
                    "Failed to deregister instance: {}",
                    e
                );
            }
        }
    }
}

impl Drop for SelfRegistrar {
    fn drop(&mut self) {
        if *self.registered.get_mut() {
            tracing::debug!(
                instance_id = %self.instance_id,
                "SelfRegistrar dropped (stop should be called explicitly)"
            );
        }
    }
}
