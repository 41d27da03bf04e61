//! Hash ring data structure.
//!
//! Holds a `BTreeMap<Token, _>` behind a readers-writer lock. Each node key
//! owns exactly one position, so the set of stored tokens is the image of the
//! partitioner over the registered node keys.
//!
//! # Lookup
//!
//! A key is owned by the node at the smallest stored token `>=` the key's
//! token. When the key's token is past every stored token the search wraps
//! to the smallest stored token.
//!
//! # Remapping
//!
//! Adding a node only takes over the arc between its predecessor and itself.
//! Removing a node hands its arc to its successor. No other key moves.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::partitioner::{Md5Partitioner, Partitioner};
use crate::token::Token;

#[derive(Clone, Debug)]
struct RingEntry<N> {
    node_key: String,
    node: N,
}

/// Thread-safe consistent hash ring mapping tokens to nodes.
///
/// Lookups take a shared lock and may run concurrently; `add` and `remove`
/// take the exclusive lock, so a reader never sees a half-applied mutation.
/// Nodes are cloned out of the ring, never borrowed.
#[derive(Debug)]
pub struct HashRing<N, P = Md5Partitioner> {
    partitioner: P,
    entries: RwLock<BTreeMap<Token, RingEntry<N>>>,
}

impl<N: Clone> HashRing<N> {
    /// Creates an empty ring using the MD5 partitioner.
    pub fn new() -> Self {
        Self::with_partitioner(Md5Partitioner)
    }
}

impl<N: Clone> Default for HashRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone, P: Partitioner> HashRing<N, P> {
    /// Creates an empty ring placing keys with `partitioner`.
    pub fn with_partitioner(partitioner: P) -> Self {
        Self {
            partitioner,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Token a key (node key or request key) maps to.
    pub fn token_for(&self, key: &str) -> Token {
        self.partitioner.partition(key.as_bytes())
    }

    /// Places `node` at the token of `node_key`.
    ///
    /// An existing node at the same token is overwritten and returned. Two
    /// different node keys colliding on one token is accepted; the later
    /// add wins.
    pub fn add(&self, node_key: &str, node: N) -> Option<N> {
        let token = self.token_for(node_key);
        let entry = RingEntry {
            node_key: node_key.to_owned(),
            node,
        };

        let replaced = self.entries.write().insert(token, entry)?;
        if replaced.node_key != node_key {
            tracing::warn!(
                %token,
                previous = %replaced.node_key,
                current = %node_key,
                "Ring position collision, overwriting previous node"
            );
        }
        Some(replaced.node)
    }

    /// Removes whatever node sits at the token of `node_key`.
    ///
    /// Removing a key that is not on the ring is a no-op.
    pub fn remove(&self, node_key: &str) -> Option<N> {
        let token = self.token_for(node_key);
        self.entries.write().remove(&token).map(|entry| entry.node)
    }

    /// Finds the node owning `key`, or `None` if the ring is empty.
    pub fn lookup(&self, key: &str) -> Option<N> {
        self.lookup_token(self.token_for(key))
    }

    /// Ceiling search with wraparound for an already-computed token.
    pub fn lookup_token(&self, token: Token) -> Option<N> {
        let entries = self.entries.read();
        entries
            .range(token..)
            .next()
            .or_else(|| entries.iter().next())
            .map(|(_, entry)| entry.node.clone())
    }

    /// Number of stored positions.
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every `(token, node)` pair in ring order.
    pub fn tokens(&self) -> Vec<(Token, N)> {
        self.entries
            .read()
            .iter()
            .map(|(token, entry)| (*token, entry.node.clone()))
            .collect()
    }

    /// Snapshot of every node in ring order.
    pub fn nodes(&self) -> Vec<N> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.node.clone())
            .collect()
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }
}

/// Builder for a pre-populated ring.
///
/// ```rust
/// use corelib::{InstanceId, RingBuilder, ServiceInstance};
///
/// let ring = RingBuilder::new()
///     .add_node("1", ServiceInstance::new(InstanceId(1), "10.0.0.1", 8081))
///     .add_node("2", ServiceInstance::new(InstanceId(2), "10.0.0.2", 8081))
///     .build();
/// assert_eq!(ring.size(), 2);
/// ```
#[derive(Debug)]
pub struct RingBuilder<N, P = Md5Partitioner> {
    partitioner: P,
    nodes: Vec<(String, N)>,
}

impl<N: Clone> RingBuilder<N> {
    pub fn new() -> Self {
        Self {
            partitioner: Md5Partitioner,
            nodes: Vec::new(),
        }
    }
}

impl<N: Clone> Default for RingBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Clone, P: Partitioner> RingBuilder<N, P> {
    /// Swaps the partitioner used to place nodes and keys.
    pub fn partitioner<Q: Partitioner>(self, partitioner: Q) -> RingBuilder<N, Q> {
        RingBuilder {
            partitioner,
            nodes: self.nodes,
        }
    }

    pub fn add_node(mut self, node_key: impl Into<String>, node: N) -> Self {
        self.nodes.push((node_key.into(), node));
        self
    }

    pub fn build(self) -> HashRing<N, P> {
        let ring = HashRing::with_partitioner(self.partitioner);
        for (node_key, node) in self.nodes {
            ring.add(&node_key, node);
        }
        ring
    }
}
