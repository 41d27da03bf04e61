//! Command-line front end for the consistent-hash router.
//!
//! Provides commands for:
//! - Running a local cluster: coordination ensemble, backend services and
//!   the load balancer in one process
//! - Inspecting ring placement for a set of instance ids

pub mod commands;
pub mod config;

pub use commands::{ClusterArgs, Command, RingArgs};
pub use config::CliConfig;
