//! Worker registry: one Mirror and one metabolism loop per worker id.
//!
//! [`Registry::register`] is the only place a Mirror is created. The
//! registry keeps an [`Arc`] to each [`WorkerEntry`] so handlers can read
//! from a worker while another task unregisters it; the entry just stops
//! receiving new observers.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use holomirror_core::{
    DrainReport, HolographicBuffer, MetabolismConfig, MetabolismExit, MirrorConfig, WorkerHandle,
    spawn_metabolism_loop,
};
use holomirror_types::{WorkerId, WorkerMetadata, WorkerSnapshot, WorkerState, WorkerSummary};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RegistryError;

/// A registered worker and everything the gateway owns on its behalf.
pub struct WorkerEntry {
    worker_id: WorkerId,
    mirror: Arc<HolographicBuffer>,
    handle: Arc<dyn WorkerHandle>,
    metadata: WorkerMetadata,
    metabolism: Mutex<Option<JoinHandle<MetabolismExit>>>,
    cancel: CancellationToken,
}

impl core::fmt::Debug for WorkerEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerEntry")
            .field("worker_id", &self.worker_id)
            .field("mirror", &self.mirror)
            .field("running", &self.handle.is_running())
            .finish_non_exhaustive()
    }
}

impl WorkerEntry {
    /// The worker's id.
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// The worker's Mirror.
    pub const fn mirror(&self) -> &Arc<HolographicBuffer> {
        &self.mirror
    }

    /// The worker handle used by the inject channel.
    pub const fn handle(&self) -> &Arc<dyn WorkerHandle> {
        &self.handle
    }

    /// Metadata supplied at registration.
    pub const fn metadata(&self) -> &WorkerMetadata {
        &self.metadata
    }

    /// Running or stopped, as reported by the worker handle.
    pub fn state(&self) -> WorkerState {
        WorkerState::from_running(self.handle.is_running())
    }

    /// Listing row for `GET /api/workers`.
    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            worker_id: self.worker_id.clone(),
            state: self.state(),
            observer_count: self.mirror.observer_count(),
            total_events: self.mirror.total_events_published(),
            history_length: self.mirror.history_length(),
        }
    }

    /// Point-in-time view for `GET /api/{worker_id}/snapshot`.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.worker_id.clone(),
            state: self.state(),
            metadata: self.metadata.clone(),
            history: self.mirror.history(),
            total_events: self.mirror.total_events_published(),
            observer_count: self.mirror.observer_count(),
        }
    }

    /// Cancel the metabolism loop and wait up to `timeout` for it to exit.
    ///
    /// Returns `None` if the loop was already stopped by an earlier call,
    /// or if it had to be aborted.
    pub async fn stop_metabolism(&self, timeout: Duration) -> Option<MetabolismExit> {
        self.cancel.cancel();
        let handle = self.metabolism.lock().take()?;
        let abort = handle.abort_handle();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                warn!(worker_id = %self.worker_id, error = %e, "metabolism loop ended abnormally");
                None
            }
            Err(_elapsed) => {
                abort.abort();
                warn!(worker_id = %self.worker_id, "metabolism loop did not stop in time, aborted");
                None
            }
        }
    }
}

/// Thread-safe map of worker id to [`WorkerEntry`].
#[derive(Debug)]
pub struct Registry {
    workers: RwLock<BTreeMap<WorkerId, Arc<WorkerEntry>>>,
    mirror_config: MirrorConfig,
    metabolism_config: MetabolismConfig,
    drain_timeout: Duration,
}

impl Registry {
    /// Create an empty registry.
    ///
    /// `drain_timeout` bounds both the metabolism stop and the Mirror drain
    /// performed by [`unregister`](Self::unregister).
    pub const fn new(
        mirror_config: MirrorConfig,
        metabolism_config: MetabolismConfig,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            workers: RwLock::new(BTreeMap::new()),
            mirror_config,
            metabolism_config,
            drain_timeout,
        }
    }

    /// Register a worker: create its Mirror and start its metabolism loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(
        &self,
        worker_id: WorkerId,
        handle: Arc<dyn WorkerHandle>,
        metadata: WorkerMetadata,
    ) -> Result<Arc<HolographicBuffer>, RegistryError> {
        Handle::try_current().map_err(|_no_runtime| RegistryError::NoRuntime)?;

        let mut workers = self.workers.write();
        let slot = match workers.entry(worker_id) {
            Entry::Occupied(occupied) => {
                return Err(RegistryError::AlreadyRegistered(occupied.key().clone()));
            }
            Entry::Vacant(slot) => slot,
        };

        let worker_id = slot.key().clone();
        let mirror = Arc::new(HolographicBuffer::new(
            worker_id.clone(),
            &self.mirror_config,
        ));
        let cancel = CancellationToken::new();
        let metabolism = spawn_metabolism_loop(
            Arc::clone(&handle),
            Arc::clone(&mirror),
            self.metabolism_config,
            cancel.clone(),
        );

        slot.insert(Arc::new(WorkerEntry {
            worker_id: worker_id.clone(),
            mirror: Arc::clone(&mirror),
            handle,
            metadata,
            metabolism: Mutex::new(Some(metabolism)),
            cancel,
        }));

        info!(
            %worker_id,
            max_history = self.mirror_config.max_history,
            workers = workers.len(),
            "worker registered"
        );
        Ok(mirror)
    }

    /// Remove a worker, stop its metabolism loop, and shut its Mirror down.
    ///
    /// Returns `false`, with no side effect, if the id is unknown.
    pub async fn unregister(&self, worker_id: &WorkerId) -> bool {
        let removed = self.workers.write().remove(worker_id);
        let Some(entry) = removed else {
            debug!(%worker_id, "unregister of unknown worker ignored");
            return false;
        };

        let (_, report) = shut_down_entry(&entry, self.drain_timeout).await;
        info!(
            %worker_id,
            completed = report.completed,
            cancelled = report.cancelled,
            "worker unregistered"
        );
        true
    }

    /// Look up a worker.
    pub fn get(&self, worker_id: &WorkerId) -> Option<Arc<WorkerEntry>> {
        self.workers.read().get(worker_id).cloned()
    }

    /// Look up a worker, failing with [`RegistryError::NotFound`].
    pub fn require(&self, worker_id: &WorkerId) -> Result<Arc<WorkerEntry>, RegistryError> {
        self.get(worker_id)
            .ok_or_else(|| RegistryError::NotFound(worker_id.clone()))
    }

    /// Every registered worker, ordered by id.
    pub fn list(&self) -> Vec<Arc<WorkerEntry>> {
        self.workers.read().values().cloned().collect()
    }

    /// Listing rows for every registered worker, ordered by id.
    pub fn summaries(&self) -> Vec<WorkerSummary> {
        self.list().iter().map(|entry| entry.summary()).collect()
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    /// Whether no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Bound applied to metabolism stop and Mirror drain.
    pub const fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

/// Stop one worker's loop and shut its Mirror down, keeping it registered.
pub(crate) async fn shut_down_entry(
    entry: &WorkerEntry,
    timeout: Duration,
) -> (WorkerId, DrainReport) {
    entry.stop_metabolism(timeout).await;
    let report = entry.mirror.shutdown(timeout).await;
    (entry.worker_id.clone(), report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use holomirror_core::ManualWorker;
    use holomirror_types::EventKind;

    use super::*;

    fn registry() -> Registry {
        Registry::new(
            MirrorConfig::default(),
            MetabolismConfig {
                interval_ms: 100,
                backlog_capacity: 10,
            },
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let registry = registry();
        let worker = Arc::new(ManualWorker::new());
        let mirror = registry
            .register(WorkerId::from("w1"), worker, WorkerMetadata::new())
            .unwrap();

        let entry = registry.get(&WorkerId::from("w1")).unwrap();
        assert!(Arc::ptr_eq(entry.mirror(), &mirror));
        assert_eq!(entry.state(), WorkerState::Running);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&WorkerId::from("w2")).is_none());
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected() {
        let registry = registry();
        registry
            .register(
                WorkerId::from("w1"),
                Arc::new(ManualWorker::new()),
                WorkerMetadata::new(),
            )
            .unwrap();
        let err = registry
            .register(
                WorkerId::from("w1"),
                Arc::new(ManualWorker::new()),
                WorkerMetadata::new(),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered(WorkerId::from("w1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_outside_runtime_fails_cleanly() {
        let registry = registry();
        let err = registry
            .register(
                WorkerId::from("w1"),
                Arc::new(ManualWorker::new()),
                WorkerMetadata::new(),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::NoRuntime);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unregister_unknown_is_a_no_op() {
        let registry = registry();
        registry
            .register(
                WorkerId::from("w1"),
                Arc::new(ManualWorker::new()),
                WorkerMetadata::new(),
            )
            .unwrap();
        assert!(!registry.unregister(&WorkerId::from("nope")).await);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list().first().unwrap().worker_id().as_str(), "w1");
    }

    #[tokio::test]
    async fn unregister_stops_metabolism() {
        let registry = registry();
        let mirror = registry
            .register(
                WorkerId::from("w1"),
                Arc::new(ManualWorker::new()),
                WorkerMetadata::new(),
            )
            .unwrap();
        assert!(registry.unregister(&WorkerId::from("w1")).await);
        assert!(registry.is_empty());
        assert!(mirror.is_draining());

        let before = mirror.history_length();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(mirror.history_length(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_worker_reports_stopped_state() {
        let registry = registry();
        let worker = Arc::new(ManualWorker::new());
        let mirror = registry
            .register(
                WorkerId::from("w1"),
                Arc::clone(&worker) as Arc<dyn WorkerHandle>,
                WorkerMetadata::new(),
            )
            .unwrap();
        worker.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let summary = registry.summaries().pop().unwrap();
        assert_eq!(summary.state, WorkerState::Stopped);
        assert!(
            mirror
                .history()
                .iter()
                .any(|e| e.kind == EventKind::LifecycleStopped)
        );
    }
}
