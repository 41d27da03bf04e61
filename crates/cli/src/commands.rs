//! Subcommands.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use corelib::{HashRing, InstanceId};
use membership::{LocalEnsemble, MembershipSync, SelfRegistrar};
use proxy::{backend_app, balancer_app, BackendState, ProcessingService, Proxy};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a coordination ensemble, backend services and the load balancer
    Cluster(ClusterArgs),

    /// Show ring placement for a set of instance ids
    Ring(RingArgs),
}

#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Load balancer listen address
    #[arg(long, env = "HASHROUTE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Number of backend services to start
    #[arg(long, env = "HASHROUTE_INSTANCES", default_value_t = 3)]
    pub instances: usize,

    /// Host backend services bind to and register under
    #[arg(long, env = "HASHROUTE_BACKEND_HOST", default_value = "127.0.0.1")]
    pub backend_host: String,

    /// Coordination namespace holding registered instances
    #[arg(long, env = "HASHROUTE_NAMESPACE", default_value = "/services/api")]
    pub namespace: String,

    /// Simulated per-user processing time
    #[arg(long, env = "HASHROUTE_PROCESSING_MS", default_value_t = 5000)]
    pub processing_ms: u64,

    /// Upstream call timeout (unbounded when unset)
    #[arg(long, env = "HASHROUTE_UPSTREAM_TIMEOUT_MS")]
    pub upstream_timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct RingArgs {
    /// Instance id to place on the ring (repeatable)
    #[arg(long = "instance", required = true)]
    pub instances: Vec<u64>,

    /// Key to resolve (repeatable)
    #[arg(long = "key")]
    pub keys: Vec<String>,

    /// Number of synthetic keys used to measure ownership shares
    #[arg(long, default_value_t = 10_000)]
    pub sample: usize,
}

impl Command {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Command::Cluster(args) => run_cluster(args).await,
            Command::Ring(args) => {
                print!("{}", ring_report(&args));
                Ok(())
            }
        }
    }
}

struct Backend {
    registrar: SelfRegistrar,
    server: JoinHandle<std::io::Result<()>>,
}

async fn run_cluster(args: ClusterArgs) -> anyhow::Result<()> {
    let ensemble = LocalEnsemble::new();
    let shutdown = CancellationToken::new();
    let processing_time = Duration::from_millis(args.processing_ms);

    let mut backends = Vec::with_capacity(args.instances);
    for _ in 0..args.instances {
        let backend = start_backend(&ensemble, &args, processing_time, &shutdown).await?;
        backends.push(backend);
    }

    let sync = MembershipSync::start(Arc::new(ensemble.connect()), &args.namespace)
        .await
        .context("Failed to start membership sync")?;
    let sync = Arc::new(sync);

    let mut proxy = Proxy::new(sync.clone()).context("Failed to build upstream client")?;
    if let Some(ms) = args.upstream_timeout_ms {
        proxy = proxy.upstream_timeout(Duration::from_millis(ms));
    }

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind load balancer on {}", args.listen))?;
    tracing::info!(
        listen = %args.listen,
        instances = sync.instance_count(),
        "Load balancer listening"
    );
    let balancer = spawn_server(listener, balancer_app(Arc::new(proxy)), &shutdown);

    wait_for_shutdown_signal().await?;

    for backend in &backends {
        backend.registrar.stop().await;
    }
    sync.stop().await;
    shutdown.cancel();

    balancer.await??;
    for backend in backends {
        backend.server.await??;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn start_backend(
    ensemble: &LocalEnsemble,
    args: &ClusterArgs,
    processing_time: Duration,
    shutdown: &CancellationToken,
) -> anyhow::Result<Backend> {
    let listener = TcpListener::bind((args.backend_host.as_str(), 0))
        .await
        .with_context(|| format!("Failed to bind backend on {}", args.backend_host))?;
    let addr = listener.local_addr()?;

    let registrar = SelfRegistrar::start(
        Arc::new(ensemble.connect()),
        &args.namespace,
        &args.backend_host,
        addr.port(),
    )
    .await
    .context("Failed to register backend")?;

    let app = backend_app(BackendState {
        processing: Arc::new(ProcessingService::new(processing_time)),
        instance_id: registrar.instance_id(),
    });
    tracing::info!(instance_id = %registrar.instance_id(), %addr, "Backend listening");

    Ok(Backend {
        registrar,
        server: spawn_server(listener, app, shutdown),
    })
}

fn spawn_server(
    listener: TcpListener,
    app: axum::Router,
    shutdown: &CancellationToken,
) -> JoinHandle<std::io::Result<()>> {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    })
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}

const RING_SPAN: f64 = (u32::MAX as f64) + 1.0;

/// Placement table, per-key owners and ownership shares for `args`.
pub fn ring_report(args: &RingArgs) -> String {
    let ring: HashRing<InstanceId> = HashRing::new();
    for &id in &args.instances {
        let id = InstanceId(id);
        ring.add(&id.node_key(), id);
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "Ring: {} positions ({})",
        ring.size(),
        ring.partitioner_name()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<10}  {:<10}  {:>7}", "TOKEN", "INSTANCE", "ARC");
    let tokens = ring.tokens();
    for (i, (token, id)) in tokens.iter().enumerate() {
        // Each position owns the arc back to its predecessor.
        let previous = tokens[(i + tokens.len() - 1) % tokens.len()].0;
        let arc = match previous.distance_to(token) {
            0 => RING_SPAN,
            distance => distance as f64,
        };
        let _ = writeln!(
            out,
            "{:<10}  {:<10}  {:>6.2}%",
            token.to_string(),
            id.to_string(),
            arc * 100.0 / RING_SPAN
        );
    }

    if !args.keys.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<24}  {:<10}  {}", "KEY", "TOKEN", "INSTANCE");
        for key in &args.keys {
            let owner = ring
                .lookup(key)
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{:<24}  {:<10}  {}",
                key,
                ring.token_for(key).to_string(),
                owner
            );
        }
    }

    if args.sample > 0 {
        let mut counts: BTreeMap<InstanceId, usize> =
            ring.nodes().into_iter().map(|id| (id, 0)).collect();
        for i in 0..args.sample {
            if let Some(id) = ring.lookup(&format!("user-{}", i)) {
                *counts.entry(id).or_default() += 1;
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Ownership over {} sample keys", args.sample);
        let _ = writeln!(out, "{:<10}  {:>8}  {:>7}", "INSTANCE", "KEYS", "SHARE");
        for (id, count) in counts {
            let share = count as f64 * 100.0 / args.sample as f64;
            let _ = writeln!(out, "{:<10}  {:>8}  {:>6.1}%", id.to_string(), count, share);
        }
    }

    out
}
