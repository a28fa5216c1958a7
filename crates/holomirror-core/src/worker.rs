//! The worker seen from the gateway's side.
//!
//! The observed computation itself lives outside this crate. The gateway
//! and the metabolism loop only need what [`WorkerHandle`] exposes: an
//! `invoke` for the inject channel, a running flag, a stop signal, and a
//! cheap counter read.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::InvokeError;

/// Point-in-time reading of a worker's internal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerCounters {
    /// Items waiting to be processed.
    pub backlog: u64,
    /// Items processed since the worker started (monotonic).
    pub processed_total: u64,
    /// Worker-computed resource consumption rate, nominally `0..=1`.
    pub heat: f64,
}

/// Handle on an external, long-running worker.
///
/// `counters` is called from the metabolism loop once per tick and must
/// not take any lock the worker holds on its hot path.
pub trait WorkerHandle: Send + Sync {
    /// Forward an inject payload to the worker and await its reply.
    fn invoke(
        &self,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value, InvokeError>>;

    /// Whether the worker is still running.
    fn is_running(&self) -> bool;

    /// Resolves once the worker has stopped (immediately if it already has).
    fn stopped(&self) -> BoxFuture<'_, ()>;

    /// Read the current counters.
    fn counters(&self) -> WorkerCounters;
}

/// A worker driven by hand.
///
/// Counters are set explicitly and `invoke` echoes its payload, or fails
/// with the message under `"fail"` when the payload is an object with that
/// key. Useful for tests and for embedding code that runs its own loop.
#[derive(Debug)]
pub struct ManualWorker {
    stop: CancellationToken,
    backlog: AtomicU64,
    processed_total: AtomicU64,
    /// `f64` bits.
    heat: AtomicU64,
    invocations: AtomicU64,
    running: AtomicBool,
}

impl ManualWorker {
    /// Create a running worker with zeroed counters.
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            backlog: AtomicU64::new(0),
            processed_total: AtomicU64::new(0),
            heat: AtomicU64::new(0.0_f64.to_bits()),
            invocations: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }
    }

    /// Set the backlog depth.
    pub fn set_backlog(&self, backlog: u64) {
        self.backlog.store(backlog, Ordering::Relaxed);
    }

    /// Add to the processed counter.
    pub fn record_processed(&self, count: u64) {
        self.processed_total.fetch_add(count, Ordering::Relaxed);
    }

    /// Set the heat value reported to the metabolism loop.
    pub fn set_heat(&self, heat: f64) {
        self.heat.store(heat.to_bits(), Ordering::Relaxed);
    }

    /// Number of `invoke` calls received.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Mark the worker as stopped and wake everything waiting on it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stop.cancel();
    }
}

impl Default for ManualWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerHandle for ManualWorker {
    fn invoke(
        &self,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value, InvokeError>> {
        Box::pin(async move {
            self.invocations.fetch_add(1, Ordering::Relaxed);
            if !self.is_running() {
                return Err(InvokeError::NotRunning);
            }
            if let Some(message) = payload.get("fail").and_then(serde_json::Value::as_str) {
                return Err(InvokeError::Rejected(message.to_owned()));
            }
            Ok(serde_json::json!({ "echo": payload }))
        })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stopped(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.stop.cancelled())
    }

    fn counters(&self) -> WorkerCounters {
        WorkerCounters {
            backlog: self.backlog.load(Ordering::Relaxed),
            processed_total: self.processed_total.load(Ordering::Relaxed),
            heat: f64::from_bits(self.heat.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invoke_echoes_payload() {
        let worker = ManualWorker::new();
        let reply = worker.invoke(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(reply, serde_json::json!({"echo": {"x": 1}}));
        assert_eq!(worker.invocations(), 1);
    }

    #[tokio::test]
    async fn invoke_failure_is_verbatim() {
        let worker = ManualWorker::new();
        let err = worker
            .invoke(serde_json::json!({"fail": "queue full"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "queue full");
    }

    #[tokio::test]
    async fn stop_resolves_stopped_and_rejects_invoke() {
        let worker = ManualWorker::new();
        worker.stop();
        worker.stopped().await;
        assert!(!worker.is_running());
        assert_eq!(
            worker.invoke(serde_json::json!(null)).await,
            Err(InvokeError::NotRunning)
        );
    }

    #[test]
    fn counters_reflect_setters() {
        let worker = ManualWorker::new();
        worker.set_backlog(7);
        worker.record_processed(3);
        worker.record_processed(2);
        worker.set_heat(0.5);
        let counters = worker.counters();
        assert_eq!(counters.backlog, 7);
        assert_eq!(counters.processed_total, 5);
        assert!((counters.heat - 0.5).abs() < f64::EPSILON);
    }
}
