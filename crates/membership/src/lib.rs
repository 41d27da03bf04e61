//! Cluster membership backed by a coordination service.
//!
//! This crate provides:
//! - The [`Coordinator`] contract the router needs from a coordination
//!   service (namespaces, ephemeral sequential entries, child watches)
//! - [`LocalEnsemble`], an in-process coordination service with sessions
//! - [`MembershipSync`], which keeps a hash ring in step with the registered
//!   instances under a namespace
//! - [`SelfRegistrar`], which registers the local instance on startup and
//!   deregisters it on shutdown
//!
//! # Example
//!
//! ```rust,ignore
//! use membership::{LocalEnsemble, MembershipSync, SelfRegistrar};
//! use std::sync::Arc;
//!
//! let ensemble = LocalEnsemble::new();
//! let registrar = SelfRegistrar::start(Arc::new(ensemble.connect()), "/services/api", "127.0.0.1", 8081).await?;
//! let sync = MembershipSync::start(Arc::new(ensemble.connect()), "/services/api").await?;
//!
//! let owner = sync.resolve("user-1");
//! registrar.stop().await;
//! sync.stop().await;
//! ```
//!
//! # Failure Detection
//!
//! - **Graceful shutdown**: the registrar deletes its entry and watchers see
//!   a removal immediately
//! - **Crash / session loss**: the coordination service drops the session's
//!   ephemeral entries and watchers see the same removal

mod coordinator;
mod ensemble;
mod error;
mod registrar;
mod registry;
mod sync;

pub use coordinator::{ChildData, ChildEvent, ChildWatch, Coordinator};
pub use ensemble::{LocalEnsemble, LocalSession, SessionId};
pub use error::{Error, Result};
pub use registrar::SelfRegistrar;
pub use registry::{decode_instance, encode_payload, instance_id_from_path, InstancePayload};
pub use sync::{MembershipEvent, MembershipSync};
