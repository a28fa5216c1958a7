//! Gateway startup helper for embedding in a host binary.
//!
//! [`spawn_gateway`] binds eagerly, so address problems surface to the
//! caller, then serves on a background Tokio task.
//!
//! # Usage
//!
//! ```rust,ignore
//! use holomirror_gateway::startup::spawn_gateway;
//! use holomirror_gateway::{AppState, ServerConfig};
//! use std::sync::Arc;
//!
//! let state = Arc::new(AppState::new(&config));
//! let gateway = spawn_gateway(&ServerConfig::default(), Arc::clone(&state)).await?;
//! // ... register workers, wait for a signal, run the ShutdownCoordinator ...
//! gateway.handle.await??;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError, bind, serve};
use crate::state::AppState;

/// Errors that can occur when spawning the gateway.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// A gateway running on a background task.
#[derive(Debug)]
pub struct RunningGateway {
    /// Address actually bound (useful with port `0`).
    pub addr: SocketAddr,
    /// The serving task; resolves after shutdown.
    pub handle: JoinHandle<Result<(), ServerError>>,
}

/// Bind the listener and serve the gateway on a background task.
///
/// The task runs until `state.shutdown` is cancelled.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address is invalid or cannot be
/// bound.
pub async fn spawn_gateway(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> Result<RunningGateway, StartupError> {
    let listener = bind(config).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("failed to read bound address: {e}")))?;

    let handle = tokio::spawn(serve(listener, state));
    tracing::info!(%addr, "gateway spawned on background task");

    Ok(RunningGateway { addr, handle })
}
