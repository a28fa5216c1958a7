//! Metabolism sampling loop.
//!
//! One loop per registered worker turns the worker's counters into
//! `metabolism` events on the worker's own Mirror, so being measured and
//! being observed share one path. When the worker stops, the loop publishes
//! a single `lifecycle_stopped` event with cumulative totals and exits.
//!
//! The loop only reads counters through [`WorkerHandle::counters`] and only
//! writes through [`HolographicBuffer::publish`]; it never retries.

use std::sync::Arc;
use std::time::Duration;

use holomirror_types::{Event, LifecycleTotals, MetabolismSample};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use crate::config::MetabolismConfig;
use crate::mirror::HolographicBuffer;
use crate::worker::{WorkerCounters, WorkerHandle};

/// Why a metabolism loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetabolismExit {
    /// The worker stopped; the final totals were published.
    WorkerStopped(LifecycleTotals),
    /// The loop was cancelled (worker unregistered or gateway shutdown).
    Cancelled,
}

/// Turns successive counter readings into [`MetabolismSample`]s.
#[derive(Debug, Clone)]
pub struct MetabolismSampler {
    backlog_capacity: u64,
    last_processed: u64,
    samples: u64,
}

impl MetabolismSampler {
    /// Start from an initial reading so the first flow only counts new work.
    pub const fn new(initial: WorkerCounters, backlog_capacity: u64) -> Self {
        Self {
            backlog_capacity,
            last_processed: initial.processed_total,
            samples: 0,
        }
    }

    /// Derive a sample from `counters` covering `elapsed` wall time.
    pub fn sample(&mut self, counters: WorkerCounters, elapsed: Duration) -> MetabolismSample {
        let processed_delta = counters.processed_total.saturating_sub(self.last_processed);
        self.last_processed = counters.processed_total;
        self.samples = self.samples.saturating_add(1);

        MetabolismSample {
            pressure: pressure(counters.backlog, self.backlog_capacity),
            flow: flow(processed_delta, elapsed),
            temperature: temperature(counters.heat),
            backlog: counters.backlog,
            processed_delta,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Samples produced so far.
    pub const fn samples(&self) -> u64 {
        self.samples
    }
}

/// Backlog normalized to `0..=100` against `capacity`.
///
/// A zero capacity reports full pressure for any non-empty backlog.
#[allow(clippy::cast_precision_loss)]
pub fn pressure(backlog: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        return if backlog == 0 { 0.0 } else { 100.0 };
    }
    (backlog as f64 / capacity as f64 * 100.0).clamp(0.0, 100.0)
}

/// Events per second; zero when no time has elapsed.
#[allow(clippy::cast_precision_loss)]
pub fn flow(processed_delta: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    processed_delta as f64 / seconds
}

/// Worker heat clamped to `0..=1`; non-finite readings become `0`.
pub fn temperature(heat: f64) -> f64 {
    if !heat.is_finite() {
        return 0.0;
    }
    heat.clamp(0.0, 1.0)
}

/// Spawn the sampling loop for one worker.
///
/// The loop publishes one `metabolism` event per `config.interval()` until
/// the worker stops (final `lifecycle_stopped` event) or `cancel` fires.
pub fn spawn_metabolism_loop(
    worker: Arc<dyn WorkerHandle>,
    mirror: Arc<HolographicBuffer>,
    config: MetabolismConfig,
    cancel: CancellationToken,
) -> JoinHandle<MetabolismExit> {
    let span = info_span!("metabolism", worker_id = %mirror.worker_id());
    tokio::spawn(run_metabolism_loop(worker, mirror, config, cancel).instrument(span))
}

async fn run_metabolism_loop(
    worker: Arc<dyn WorkerHandle>,
    mirror: Arc<HolographicBuffer>,
    config: MetabolismConfig,
    cancel: CancellationToken,
) -> MetabolismExit {
    let started = Instant::now();
    let mut sampler = MetabolismSampler::new(worker.counters(), config.backlog_capacity);

    let mut ticker = tokio::time::interval(config.interval().max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; samples start one interval in.
    ticker.tick().await;
    let mut last_tick = Instant::now();

    let stopped = worker.stopped();
    tokio::pin!(stopped);

    debug!(interval_ms = config.interval_ms, "metabolism loop started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(samples = sampler.samples(), "metabolism loop cancelled");
                return MetabolismExit::Cancelled;
            }
            () = &mut stopped => {
                let totals = LifecycleTotals {
                    samples: sampler.samples(),
                    processed_total: worker.counters().processed_total,
                    uptime_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                };
                mirror.publish(Event::stopped(mirror.worker_id().clone(), &totals));
                info!(
                    samples = totals.samples,
                    processed_total = totals.processed_total,
                    uptime_ms = totals.uptime_ms,
                    "worker stopped, metabolism loop exiting"
                );
                return MetabolismExit::WorkerStopped(totals);
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let sample = sampler.sample(worker.counters(), now.duration_since(last_tick));
                last_tick = now;
                mirror.publish(Event::metabolism(mirror.worker_id().clone(), &sample));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use holomirror_types::{EventKind, WorkerId};

    use super::*;
    use crate::config::MirrorConfig;
    use crate::worker::ManualWorker;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn pressure_is_normalized_and_clamped() {
        assert!(approx(pressure(0, 1000), 0.0));
        assert!(approx(pressure(250, 1000), 25.0));
        assert!(approx(pressure(5000, 1000), 100.0));
        assert!(approx(pressure(3, 0), 100.0));
        assert!(approx(pressure(0, 0), 0.0));
    }

    #[test]
    fn flow_is_rate_per_second() {
        assert!(approx(flow(10, Duration::from_secs(2)), 5.0));
        assert!(approx(flow(10, Duration::ZERO), 0.0));
    }

    #[test]
    fn temperature_is_clamped() {
        assert!(approx(temperature(-0.5), 0.0));
        assert!(approx(temperature(0.4), 0.4));
        assert!(approx(temperature(7.0), 1.0));
        assert!(approx(temperature(f64::NAN), 0.0));
    }

    #[test]
    fn infinite_heat_reads_as_cold() {
        assert!(approx(temperature(f64::INFINITY), 0.0));
        assert!(approx(temperature(f64::NEG_INFINITY), 0.0));
    }

    #[test]
    fn sampler_uses_deltas_and_tolerates_regressions() {
        let initial = WorkerCounters {
            backlog: 0,
            processed_total: 100,
            heat: 0.0,
        };
        let mut sampler = MetabolismSampler::new(initial, 100);

        let first = sampler.sample(
            WorkerCounters {
                backlog: 50,
                processed_total: 110,
                heat: 0.2,
            },
            Duration::from_secs(1),
        );
        assert_eq!(first.processed_delta, 10);
        assert!(approx(first.flow, 10.0));
        assert!(approx(first.pressure, 50.0));
        assert_eq!(first.elapsed_ms, 1000);

        let regressed = sampler.sample(
            WorkerCounters {
                backlog: 0,
                processed_total: 90,
                heat: 0.2,
            },
            Duration::from_secs(1),
        );
        assert_eq!(regressed.processed_delta, 0);
        assert_eq!(sampler.samples(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_publishes_samples_then_final_totals() {
        let worker = Arc::new(ManualWorker::new());
        let mirror = Arc::new(HolographicBuffer::new(
            WorkerId::from("w1"),
            &MirrorConfig::default(),
        ));
        let config = MetabolismConfig {
            interval_ms: 100,
            backlog_capacity: 10,
        };
        let handle = spawn_metabolism_loop(
            Arc::clone(&worker) as Arc<dyn WorkerHandle>,
            Arc::clone(&mirror),
            config,
            CancellationToken::new(),
        );

        worker.set_backlog(5);
        worker.record_processed(4);
        tokio::time::sleep(Duration::from_millis(350)).await;
        worker.stop();

        let exit = handle.await.unwrap();
        assert!(
            matches!(exit, MetabolismExit::WorkerStopped(t) if t.samples == 3 && t.processed_total == 4),
            "unexpected exit {exit:?}"
        );

        let history = mirror.history();
        let kinds: Vec<EventKind> = history.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Metabolism,
                EventKind::Metabolism,
                EventKind::Metabolism,
                EventKind::LifecycleStopped,
            ]
        );
        let first = history.first().unwrap();
        assert_eq!(first.payload["backlog"], 5);
        assert_eq!(first.payload["pressure"], 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_loop_publishes_nothing_final() {
        let worker = Arc::new(ManualWorker::new());
        let mirror = Arc::new(HolographicBuffer::new(
            WorkerId::from("w1"),
            &MirrorConfig::default(),
        ));
        let cancel = CancellationToken::new();
        let handle = spawn_metabolism_loop(
            worker as Arc<dyn WorkerHandle>,
            Arc::clone(&mirror),
            MetabolismConfig::default(),
            cancel.clone(),
        );

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), MetabolismExit::Cancelled);
        assert!(
            mirror
                .history()
                .iter()
                .all(|e| e.kind != EventKind::LifecycleStopped)
        );
    }

    #[tokio::test]
    async fn already_stopped_worker_exits_immediately() {
        let worker = Arc::new(ManualWorker::new());
        worker.stop();
        let mirror = Arc::new(HolographicBuffer::new(
            WorkerId::from("w1"),
            &MirrorConfig::default(),
        ));
        let handle = spawn_metabolism_loop(
            worker as Arc<dyn WorkerHandle>,
            Arc::clone(&mirror),
            MetabolismConfig::default(),
            CancellationToken::new(),
        );
        let exit = handle.await.unwrap();
        assert!(matches!(exit, MetabolismExit::WorkerStopped(t) if t.samples == 0));
        assert_eq!(mirror.history_length(), 1);
    }
}
