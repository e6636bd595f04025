//! Process entry point: parses CLI arguments, wires the storage engine
//! and replication coordinator into the `axum` router, and serves until
//! a shutdown signal arrives.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use custodiadb::config::{ClusterConfig, EngineConfig};
use custodiadb::engine::Engine;
use custodiadb::http::{router, AppState};
use custodiadb::replication::Coordinator;

#[derive(Parser, Debug)]
#[command(author, version, about = "custodiadb replicated key-value store node", long_about = None)]
struct Args {
    /// Directory the storage engine opens its memtable/SSTable files under.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Cluster topology JSON file (self id, peer base URLs, default ack/from).
    /// When omitted, the node runs as a single-node cluster listening on `--listen`.
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Address this node's HTTP API binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Memtable size, in bytes, at which a flush is scheduled.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    flush_threshold_bytes: usize,

    /// Number of background threads available to run flushes.
    #[arg(long, default_value_t = 2)]
    flush_worker_count: usize,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let cluster = match &args.topology {
        Some(path) => ClusterConfig::load(path)?,
        None => ClusterConfig::single_node("self", format!("http://{}", args.listen)),
    };

    let engine_config = EngineConfig {
        flush_threshold_bytes: args.flush_threshold_bytes,
        flush_worker_count: args.flush_worker_count,
        ..EngineConfig::default()
    };

    let engine = Engine::open(&args.data_dir, engine_config)?;
    tracing::info!(data_dir = %args.data_dir.display(), self_id = %cluster.self_id, "engine opened");

    let coordinator = Coordinator::new(cluster, engine.clone());
    let app = router(AppState::new(coordinator, engine.clone()));

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!(addr = %args.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down, draining outstanding flushes");
    engine.close()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
