//! Synthetic demo worker.
//!
//! [`SyntheticWorker`] stands in for a real computation: a job loop pulls
//! one item per `job_interval` off a counter-backed queue, publishes a
//! `result` event for it, and keeps the counters the metabolism loop reads.
//!
//! Inject commands:
//!
//! - `{"enqueue": n}` queues `n` jobs
//! - `{"stop": true}` stops the worker
//! - `{"echo": v}` replies with `v`
//! - any non-object payload is echoed back; objects without a known
//!   command are rejected

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use holomirror_core::{HolographicBuffer, InvokeError, WorkerCounters, WorkerHandle};
use holomirror_types::Event;
use rand::Rng;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

/// Weight of the newest busy/idle observation in the heat average.
const HEAT_SMOOTHING: f64 = 0.2;

/// A worker that processes a queue of fake jobs.
#[derive(Debug)]
pub struct SyntheticWorker {
    job_interval: Duration,
    backlog: AtomicU64,
    processed_total: AtomicU64,
    /// `f64` bits.
    heat: AtomicU64,
    running: AtomicBool,
    stop: CancellationToken,
}

impl SyntheticWorker {
    /// Create a running worker with an empty queue.
    ///
    /// `job_interval` is raised to at least one millisecond.
    pub fn new(job_interval: Duration) -> Self {
        Self {
            job_interval: job_interval.max(Duration::from_millis(1)),
            backlog: AtomicU64::new(0),
            processed_total: AtomicU64::new(0),
            heat: AtomicU64::new(0.0_f64.to_bits()),
            running: AtomicBool::new(true),
            stop: CancellationToken::new(),
        }
    }

    /// Queue `count` jobs and return the new backlog.
    pub fn enqueue(&self, count: u64) -> u64 {
        let previous = self
            .backlog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
                Some(b.saturating_add(count))
            })
            .unwrap_or_else(|current| current);
        previous.saturating_add(count)
    }

    /// Stop the job loop and mark the worker as stopped.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("synthetic worker stopping");
        }
        self.stop.cancel();
    }

    /// Take one job off the queue, if any.
    fn take_job(&self) -> bool {
        self.backlog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| b.checked_sub(1))
            .is_ok()
    }

    fn record_heat(&self, busy: bool) {
        let previous = f64::from_bits(self.heat.load(Ordering::Relaxed));
        let observed = if busy { 1.0 } else { 0.0 };
        let next = previous.mul_add(1.0 - HEAT_SMOOTHING, observed * HEAT_SMOOTHING);
        self.heat.store(next.to_bits(), Ordering::Relaxed);
    }

    /// Start the job loop publishing to `mirror`.
    ///
    /// The returned handle resolves to the number of jobs processed by this
    /// loop once the worker stops.
    pub fn spawn(self: &Arc<Self>, mirror: Arc<HolographicBuffer>) -> JoinHandle<u64> {
        let worker = Arc::clone(self);
        let span = info_span!("synthetic", worker_id = %mirror.worker_id());
        tokio::spawn(async move { worker.run(&mirror).await }.instrument(span))
    }

    async fn run(&self, mirror: &HolographicBuffer) -> u64 {
        let mut ticker = tokio::time::interval(self.job_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut processed: u64 = 0;
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    let busy = self.take_job();
                    self.record_heat(busy);
                    if !busy {
                        continue;
                    }
                    processed = processed.saturating_add(1);
                    let total = self.processed_total.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                    let value: u32 = rand::rng().random_range(0..1000);
                    mirror.publish(Event::result(
                        mirror.worker_id().clone(),
                        json!({ "job": total, "value": value }),
                    ));
                }
            }
        }

        debug!(processed, "job loop exited");
        processed
    }

    fn handle_command(&self, payload: Value) -> Result<Value, InvokeError> {
        let command = match payload {
            Value::Object(command) => command,
            other => return Ok(json!({ "echo": other })),
        };

        if let Some(count) = command.get("enqueue") {
            let count = count.as_u64().ok_or_else(|| {
                InvokeError::Rejected("enqueue expects a non-negative integer".to_owned())
            })?;
            let backlog = self.enqueue(count);
            return Ok(json!({ "queued": count, "backlog": backlog }));
        }
        if command.get("stop").and_then(Value::as_bool) == Some(true) {
            self.stop();
            return Ok(json!({ "stopped": true }));
        }
        if let Some(value) = command.get("echo") {
            return Ok(json!({ "echo": value }));
        }

        let keys: Vec<&str> = command.keys().map(String::as_str).collect();
        Err(InvokeError::Rejected(format!(
            "unknown command: {}",
            keys.join(", ")
        )))
    }
}

impl WorkerHandle for SyntheticWorker {
    fn invoke(&self, payload: Value) -> BoxFuture<'_, Result<Value, InvokeError>> {
        Box::pin(async move {
            if !self.is_running() {
                return Err(InvokeError::NotRunning);
            }
            self.handle_command(payload)
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
            backlog: self.backlog.load(Ordering::Acquire),
            processed_total: self.processed_total.load(Ordering::Acquire),
            heat: f64::from_bits(self.heat.load(Ordering::Relaxed)),
        }
    }
}
