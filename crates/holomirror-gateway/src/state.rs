//! Shared application state for the gateway.
//!
//! [`AppState`] is wrapped in [`Arc`] and injected through Axum's `State`
//! extractor. It holds the worker registry, the channel settings read by
//! every session, and the token that tells sessions the gateway is going
//! down.

use std::sync::Arc;

use holomirror_core::HolomirrorConfig;
use holomirror_core::config::GatewaySection;
use tokio_util::sync::CancellationToken;

use crate::registry::Registry;

/// Shared state for the Axum application.
#[derive(Debug)]
pub struct AppState {
    /// Registered workers and their Mirrors.
    pub registry: Arc<Registry>,
    /// Heartbeat, idle and auth settings.
    pub gateway: GatewaySection,
    /// Queue depth allowed per observer before it is dropped.
    pub max_lag_events: usize,
    /// Cancelled once shutdown begins; sessions end when it fires.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state with an empty registry from the loaded configuration.
    pub fn new(config: &HolomirrorConfig) -> Self {
        let registry = Registry::new(
            config.mirror,
            config.metabolism,
            config.shutdown.drain_timeout(),
        );
        Self::with_registry(config, Arc::new(registry))
    }

    /// Build state around an existing registry.
    pub fn with_registry(config: &HolomirrorConfig, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            gateway: config.gateway.clone(),
            max_lag_events: config.mirror.max_lag_events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
