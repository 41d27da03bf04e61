//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are responsible for converting keys into tokens
//! that can be placed on the hash ring.

pub mod digest;
pub mod traits;

pub use digest::Md5Partitioner;
pub use traits::Partitioner;
