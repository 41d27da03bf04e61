//! Core partitioner trait definitions.

use crate::token::Token;

/// A partitioner converts keys into tokens for placement on the hash ring.
///
/// Partitioners are stateless and thread-safe, allowing concurrent
/// token generation without synchronization overhead. The same partitioner
/// places instances (by node key) and routes requests (by request key), so
/// both live in one position space.
pub trait Partitioner: Send + Sync + 'static {
    /// Converts a key into a token.
    fn partition(&self, key: &[u8]) -> Token;

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;
}
