//! Sensorlog daemon
//!
//! Runs the logging engine with its producers: the simulated sensor poll loop
//! and the TCP ingestion server. Stops on Ctrl+C or SIGTERM, flushing the
//! active file before exit.

use clap::Parser;
use sensorlog::config::Config;
use sensorlog::ingest::IngestServer;
use sensorlog::sensors::Poller;
use sensorlog::storage::LogEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "sensorlog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sensor telemetry logger daemon")]
struct Args {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };

    config
        .logging
        .init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    tracing::info!("Sensorlog v{}", env!("CARGO_PKG_VERSION"));

    let log_config = config.to_log_config();
    tracing::info!(
        "Log directory: {:?}, archives: {:?}",
        log_config.log_dir,
        log_config.archive_dir
    );

    let engine = Arc::new(LogEngine::open(log_config.clone()).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let timer_handle = log_config
        .rotation_check
        .map(|every| engine.start_rotation_timer(every, shutdown_rx.clone()));

    let server_handle = if config.server.enabled {
        let server = IngestServer::bind(
            config.server.addr(),
            Arc::clone(&engine),
            Duration::from_secs(config.server.read_timeout_secs),
        )
        .await?;
        Some(server.spawn(shutdown_rx.clone()))
    } else {
        None
    };

    let poller_handle = if config.poller.enabled && !config.sensors.is_empty() {
        let mut poller = Poller::new(
            Arc::clone(&engine),
            Duration::from_millis(config.poller.interval_ms),
        );
        for sensor in &config.sensors {
            poller = poller.add_source(sensor.build());
        }
        Some(poller.spawn(shutdown_rx.clone()))
    } else {
        None
    };

    shutdown_signal().await;

    // Stop producers first, then flush
    let _ = shutdown_tx.send(true);

    if let Some(handle) = poller_handle {
        match handle.await {
            Ok(stats) => tracing::debug!("Poller stats: {:?}", stats),
            Err(e) => tracing::error!("Poll loop panicked: {}", e),
        }
    }
    if let Some(handle) = server_handle {
        if let Err(e) = handle.await {
            tracing::error!("Ingestion server panicked: {}", e);
        }
    }
    if let Some(handle) = timer_handle {
        if let Err(e) = handle.await {
            tracing::error!("Rotation timer panicked: {}", e);
        }
    }

    engine.stop().await?;
    tracing::info!("Final stats: {}", engine.stats().await);
    tracing::info!("Sensorlog shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping producers");
}
