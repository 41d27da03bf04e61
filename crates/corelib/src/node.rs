//! Backend instance descriptors.
//!
//! Instances are plain values: the ring stores copies and hands out clones,
//! so concurrent readers never share mutable state.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Numeric identity of a registered backend instance.
///
/// This is the sequence number the coordination service assigned when the
/// instance registered. Its decimal rendering is the instance's node key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// The stable string used to place this instance on the ring.
    pub fn node_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = Error;

    /// Parses a decimal sequence number, tolerating zero padding.
    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(InstanceId)
            .map_err(|e| Error::InvalidNode(format!("{:?} is not an instance id: {}", s, e)))
    }
}

/// A backend instance reachable at `host:port`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub host: String,
    pub port: u16,
}

impl ServiceInstance {
    pub fn new(id: InstanceId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for building upstream URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn node_key(&self) -> String {
        self.id.node_key()
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance {} at {}:{}", self.id, self.host, self.port)
    }
}
