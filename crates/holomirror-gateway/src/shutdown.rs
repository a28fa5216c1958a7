//! Gateway-wide graceful shutdown.
//!
//! [`ShutdownCoordinator::shutdown`] cancels the gateway token so sessions
//! wind down, stops every metabolism loop, then drains all Mirrors
//! concurrently. Every wait is bounded by the drain timeout, so the whole
//! sequence finishes in roughly one drain timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use holomirror_core::DrainReport;
use holomirror_types::WorkerId;
use serde::Serialize;
use tracing::{info, warn};

use crate::registry::shut_down_entry;
use crate::state::AppState;

/// Outcome of a gateway shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Drain outcome per worker.
    pub workers: BTreeMap<WorkerId, DrainReport>,
    /// Sum over all workers.
    pub totals: DrainReport,
}

impl ShutdownReport {
    /// Whether every in-flight broadcast finished before its deadline.
    pub const fn is_clean(&self) -> bool {
        self.totals.cancelled == 0
    }
}

/// Drives the shutdown sequence for one gateway.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    state: Arc<AppState>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator using the registry's drain timeout.
    pub fn new(state: Arc<AppState>) -> Self {
        let drain_timeout = state.registry.drain_timeout();
        Self {
            state,
            drain_timeout,
        }
    }

    /// Override the drain timeout.
    #[must_use]
    pub const fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Run the shutdown sequence. Safe to call more than once.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.state.shutdown.cancel();

        let entries = self.state.registry.list();
        info!(
            workers = entries.len(),
            drain_timeout_ms = u64::try_from(self.drain_timeout.as_millis()).unwrap_or(u64::MAX),
            "gateway shutting down"
        );

        let drains = entries
            .iter()
            .map(|entry| shut_down_entry(entry, self.drain_timeout));
        let results = futures::future::join_all(drains).await;

        let mut report = ShutdownReport::default();
        for (worker_id, drained) in results {
            report.totals = report.totals.merge(drained);
            report.workers.insert(worker_id, drained);
        }

        if report.is_clean() {
            info!(completed = report.totals.completed, "gateway shutdown complete");
        } else {
            warn!(
                completed = report.totals.completed,
                cancelled = report.totals.cancelled,
                "gateway shutdown complete, some broadcasts were cancelled"
            );
        }
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use holomirror_core::{HolomirrorConfig, ManualWorker};
    use holomirror_types::WorkerMetadata;

    use super::*;

    #[tokio::test]
    async fn shutdown_drains_every_worker() {
        let state = Arc::new(AppState::new(&HolomirrorConfig::default()));
        for id in ["a", "b"] {
            state
                .registry
                .register(
                    WorkerId::from(id),
                    Arc::new(ManualWorker::new()),
                    WorkerMetadata::new(),
                )
                .unwrap();
        }

        let report = ShutdownCoordinator::new(Arc::clone(&state))
            .with_drain_timeout(Duration::from_millis(100))
            .shutdown()
            .await;

        assert!(state.is_shutting_down());
        assert!(report.is_clean());
        assert_eq!(report.workers.len(), 2);
        for entry in state.registry.list() {
            assert!(entry.mirror().is_draining());
        }
    }

    #[tokio::test]
    async fn shutdown_with_no_workers_is_empty() {
        let state = Arc::new(AppState::new(&HolomirrorConfig::default()));
        let report = ShutdownCoordinator::new(state).shutdown().await;
        assert_eq!(report, ShutdownReport::default());
    }
}
