//! Holomirror server binary.
//!
//! Runs the observe/perturb gateway with a configurable number of synthetic
//! demo workers, until the process receives a termination signal, then
//! drains every Mirror within the configured timeout.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`HOLOMIRROR_CONFIG` or `holomirror.yaml`, then
//!    `HOLOMIRROR_*` overrides) and validate it
//! 2. Initialize structured logging (tracing)
//! 3. Register the synthetic workers and start their job loops
//! 4. Bind and serve the gateway
//! 5. Wait for SIGINT/SIGTERM/SIGQUIT (or the server exiting)
//! 6. Run the shutdown coordinator, stop the workers, join the server

mod error;
mod signals;
mod synthetic;

use std::path::PathBuf;
use std::sync::Arc;

use holomirror_core::HolomirrorConfig;
use holomirror_core::WorkerHandle;
use holomirror_core::config::LoggingConfig;
use holomirror_gateway::{AppState, ServerConfig, ShutdownCoordinator, spawn_gateway};
use holomirror_types::{WorkerId, WorkerMetadata};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServerBinError;
use crate::synthetic::SyntheticWorker;

/// Config file read when `HOLOMIRROR_CONFIG` is not set.
const DEFAULT_CONFIG_PATH: &str = "holomirror.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, worker registration, binding, or
/// serving fails.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        host = %config.server.host,
        port = config.server.port,
        max_history = config.mirror.max_history,
        broadcast_timeout_ms = config.mirror.broadcast_timeout_ms,
        drain_timeout_ms = config.shutdown.drain_timeout_ms,
        auth_required = config.gateway.auth_required,
        "holomirror-server starting"
    );

    // 3. Register demo workers.
    let state = Arc::new(AppState::new(&config));
    let mut workers = Vec::new();
    let mut jobs = Vec::new();
    for n in 1..=config.demo.workers {
        let worker_id = WorkerId::new(format!("worker-{n}"));
        let worker = Arc::new(SyntheticWorker::new(config.demo.job_interval()));

        let mut metadata = WorkerMetadata::new();
        metadata.insert("kind".to_owned(), serde_json::json!("synthetic"));
        metadata.insert(
            "job_interval_ms".to_owned(),
            serde_json::json!(config.demo.job_interval_ms),
        );

        let mirror = state.registry.register(
            worker_id,
            Arc::clone(&worker) as Arc<dyn WorkerHandle>,
            metadata,
        )?;
        jobs.push(worker.spawn(mirror));
        workers.push(worker);
    }
    info!(workers = workers.len(), "demo workers registered");

    // 4. Serve.
    let gateway = spawn_gateway(&ServerConfig::from(&config.server), Arc::clone(&state)).await?;
    let mut server = gateway.handle;

    // 5. Wait for a signal or an early server exit.
    let early_exit = tokio::select! {
        signal = signals::wait_for_shutdown_signal() => {
            let name = signal.map_err(|e| ServerBinError::Signal { message: e.to_string() })?;
            info!(signal = name, "shutdown signal received");
            None
        }
        served = &mut server => {
            warn!("gateway exited before a shutdown signal");
            Some(served)
        }
    };

    // 6. Drain.
    let report = ShutdownCoordinator::new(Arc::clone(&state)).shutdown().await;
    for worker in &workers {
        worker.stop();
    }
    let drain_timeout = config.shutdown.drain_timeout();
    for job in jobs {
        if tokio::time::timeout(drain_timeout, job).await.is_err() {
            warn!("demo job loop did not stop in time");
        }
    }

    let served = match early_exit {
        Some(served) => served,
        None => match tokio::time::timeout(drain_timeout, server).await {
            Ok(served) => served,
            Err(_elapsed) => {
                warn!("gateway did not stop in time");
                Ok(Ok(()))
            }
        },
    };
    served
        .map_err(|e| ServerBinError::Join {
            message: e.to_string(),
        })?
        .map_err(ServerBinError::from)?;

    info!(
        completed = report.totals.completed,
        cancelled = report.totals.cancelled,
        "holomirror-server stopped"
    );
    Ok(())
}

/// Load, override and validate configuration.
///
/// An explicit `HOLOMIRROR_CONFIG` must exist; the default path is
/// optional and falls back to built-in defaults.
fn load_config() -> Result<HolomirrorConfig, ServerBinError> {
    let explicit = std::env::var_os("HOLOMIRROR_CONFIG").map(PathBuf::from);
    let config = match explicit {
        Some(path) => HolomirrorConfig::from_file(&path)?,
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                HolomirrorConfig::from_file(&path)?
            } else {
                let mut config = HolomirrorConfig::default();
                config.apply_env_overrides()?;
                config
            }
        }
    };
    config.validate()?;
    Ok(config)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
