//! Pizza Telemetry - Entry Point
//!
//! Composition root: wires the counter store, sampler, exporter and
//! scheduler from a TOML config and runs until interrupted.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use pizza_telemetry::{
    Config, CounterStore, Encoder, HostSampler, HttpExporter, Scheduler, VERSION,
};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("telemetry.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    pizza_telemetry::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        telemetry = ?config.telemetry,
        "Starting telemetry pipeline"
    );

    let telemetry = &config.telemetry;
    let store = Arc::new(CounterStore::with_max_operation_keys(telemetry.max_operation_keys));
    let exporter = HttpExporter::new(telemetry.exporter_config()?)
        .context("Failed to build collector client")?;

    let scheduler = Scheduler::new(
        store,
        Arc::new(HostSampler::new()),
        Encoder::new(telemetry.source.clone()),
        Arc::new(exporter),
        telemetry.flush_interval(),
    )
    .with_export_timeout(telemetry.export_timeout())
    .with_max_concurrent_exports(telemetry.max_concurrent_exports)
    .with_flush_on_shutdown(telemetry.flush_on_shutdown)
    .spawn();

    shutdown_signal().await;
    info!("Shutdown signal received, stopping scheduler...");
    scheduler.shutdown().await;

    info!("Telemetry pipeline stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
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
