//! Resolution of request keys to backend instances.

use crate::node::ServiceInstance;
use crate::partitioner::Partitioner;
use crate::ring::HashRing;

/// Anything that can name the instance owning a request key.
///
/// Implementations read a current snapshot and never block waiting for an
/// instance to appear: `None` means no instance is registered.
pub trait InstanceResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<ServiceInstance>;
}

impl<P: Partitioner> InstanceResolver for HashRing<ServiceInstance, P> {
    fn resolve(&self, key: &str) -> Option<ServiceInstance> {
        self.lookup(key)
    }
}
