use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::commands::Command;

/// Consistent-hash request router
#[derive(Parser, Debug)]
#[command(name = "hashroute", author, version, about, long_about = None)]
pub struct CliConfig {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "HASHROUTE_LOG", default_value = "info")]
    pub log_level: String,

    /// Tokio worker threads (defaults to one per core)
    #[arg(long, env = "HASHROUTE_WORKER_THREADS")]
    pub worker_threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn run(self) -> anyhow::Result<()> {
        init_tracing(&self.log_level);

        let mut runtime = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = self.worker_threads {
            runtime.worker_threads(threads.max(1));
        }
        runtime.enable_all().build()?.block_on(self.command.execute())
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_cluster_defaults() {
        let config = CliConfig::try_parse_from(["hashroute", "cluster"]).unwrap();
        assert_eq!(config.log_level, "info");

        let Command::Cluster(args) = config.command else {
            panic!("expected cluster command");
        };
        assert_eq!(args.listen, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(args.instances, 3);
        assert_eq!(args.namespace, "/services/api");
        assert_eq!(args.processing_ms, 5000);
        assert_eq!(args.upstream_timeout_ms, None);
    }

    #[test]
    fn test_cluster_overrides() {
        let config = CliConfig::try_parse_from([
            "hashroute",
            "--log-level",
            "debug",
            "cluster",
            "--listen",
            "0.0.0.0:9000",
            "--instances",
            "5",
            "--processing-ms",
            "250",
            "--upstream-timeout-ms",
            "1000",
        ])
        .unwrap();
        assert_eq!(config.log_level, "debug");

        let Command::Cluster(args) = config.command else {
            panic!("expected cluster command");
        };
        assert_eq!(args.listen.port(), 9000);
        assert_eq!(args.instances, 5);
        assert_eq!(args.processing_ms, 250);
        assert_eq!(args.upstream_timeout_ms, Some(1000));
    }

    #[test]
    fn test_ring_requires_instances() {
        assert!(CliConfig::try_parse_from(["hashroute", "ring"]).is_err());

        let config = CliConfig::try_parse_from([
            "hashroute", "ring", "--instance", "1", "--instance", "6", "--key", "user-1",
        ])
        .unwrap();
        let Command::Ring(args) = config.command else {
            panic!("expected ring command");
        };
        assert_eq!(args.instances, vec![1, 6]);
        assert_eq!(args.keys, vec!["user-1".to_string()]);
    }
}
