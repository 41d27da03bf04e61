//! Consistent hash ring implementation.
//!
//! The ring manages token positions and provides efficient lookup
//! operations for finding the instance responsible for a key.

pub mod ring;

pub use ring::{HashRing, RingBuilder};
