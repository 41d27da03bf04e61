//! Core library for consistent-hash request routing.
//!
//! This crate provides the fundamental abstractions shared by the balancer
//! and the backend services:
//! - Ring tokens and the digest-based partitioner
//! - The thread-safe consistent hash ring
//! - Backend instance descriptors and key resolution
//! - A single-flight compute cache

pub mod error;
pub mod node;
pub mod partitioner;
pub mod resolver;
pub mod ring;
pub mod singleflight;
pub mod token;

pub use error::{Error, Result};
pub use node::{InstanceId, ServiceInstance};
pub use partitioner::{Md5Partitioner, Partitioner};
pub use resolver::InstanceResolver;
pub use ring::{HashRing, RingBuilder};
pub use singleflight::SingleFlightCache;
pub use token::Token;
