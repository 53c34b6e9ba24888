//! Speedwatch binary entry point.
//!
//! Wires the store, runner, persistence and read API together and drives
//! the process lifecycle: load the snapshot, run until a stop signal, write
//! one final checkpoint, exit.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use speedwatch::server::{AppState, create_router};
use speedwatch::{AppConfig, MeasurementStore, Persistence, Runner};

/// Grace period for background tasks after the stop signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Speedwatch - periodic speedtest runner with a persistent history.
#[derive(Parser, Debug)]
#[command(name = "speedwatch", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "SPEEDWATCH_CONFIG"
    )]
    config: String,

    /// Server bind address (overrides config file)
    #[arg(long, env = "SPEEDWATCH_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "SPEEDWATCH_SERVER_PORT")]
    server_port: Option<u16>,

    /// Snapshot file path (overrides config file)
    #[arg(long, env = "SPEEDWATCH_SNAPSHOT_PATH")]
    snapshot_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,speedwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(path) = cli.snapshot_path {
        config.snapshot.path = path;
    }
    config.validate()?;

    tracing::info!(
        targets = config.measure.server_ids.len(),
        interval = ?config.measure.interval,
        snapshot = %config.snapshot.path,
        "Speedwatch starting"
    );

    // Starting: build the store and load the durable snapshot before any
    // background task runs.
    let store = MeasurementStore::new();
    let persistence = Persistence::new(
        config.snapshot.path.clone(),
        config.snapshot.checkpoint_interval,
        store.clone(),
    );
    persistence.load().await;

    // Running: one runner task, one checkpoint task, the read API.
    //
    // The checkpoint task gets its own token so its final checkpoint runs
    // after the runner has drained and appended any partial cycle.
    let cancel = CancellationToken::new();
    let persist_cancel = CancellationToken::new();

    let runner = Runner::from_config(config.measure.clone(), store.clone());
    let runner_task = tokio::spawn(runner.run(cancel.clone()));
    let persist_task = tokio::spawn(persistence.clone().run(persist_cancel.clone()));

    let app = create_router(AppState {
        store: store.clone(),
        view_limit: config.view_limit,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Read API listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // ShuttingDown: the signal handler has cancelled the runner; give it a
    // bounded grace period, then let persistence write the final snapshot.
    if tokio::time::timeout(SHUTDOWN_GRACE, runner_task).await.is_err() {
        tracing::warn!("Measurement task did not stop within grace period");
    }

    persist_cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, persist_task).await.is_err() {
        tracing::warn!("Checkpoint task did not stop within grace period");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for a stop signal, then cancel the background tasks.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    cancel.cancel();
}
