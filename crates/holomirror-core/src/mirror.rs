//! The Mirror: buffered multicast of one worker's events.
//!
//! [`HolographicBuffer`] keeps the last `max_history` events and the set of
//! live observer connections. A worker calls [`HolographicBuffer::publish`]
//! and returns immediately; delivery happens in spawned fan-out rounds that
//! the worker never waits on.
//!
//! # Delivery rules
//!
//! - Each published event is serialized once and sent to every live
//!   connection concurrently, each send bounded by the per-send timeout
//!   measured from the moment the attempt starts.
//! - A connection whose send fails or times out is removed and closed as
//!   soon as that send ends. It is never retried, not even by rounds
//!   already queued.
//! - Every connection has its own delivery lane: its send for event `n + 1`
//!   starts once its send for event `n` has finished. Lanes are
//!   independent, so a slow connection never holds back a fast one.
//! - A connection with `max_lag_events` sends still pending is dropped at
//!   publish time instead of being queued further.
//! - A newly attached connection first receives the history snapshot taken
//!   when it joined the live set. Live sends to it wait behind that replay,
//!   and the wait counts against their own timeout.
//!
//! # Locking
//!
//! One [`parking_lot::Mutex`] guards the ring, the live set and the
//! in-flight round handles. It is held for bookkeeping only and never
//! across an `.await`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use holomirror_types::{ConnectionId, Event, WorkerId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::config::MirrorConfig;
use crate::connection::{Connection, Frame};
use crate::error::ConnectionError;
use crate::history::HistoryRing;

/// Outcome of one fan-out round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    /// Connections that accepted the frame.
    pub delivered: usize,
    /// Connections dropped from the live set by this round.
    pub dropped: usize,
}

/// Outcome of [`HolographicBuffer::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// In-flight rounds that finished before the deadline.
    pub completed: usize,
    /// Rounds still running at the deadline, aborted.
    pub cancelled: usize,
}

impl DrainReport {
    /// Combine two reports.
    pub const fn merge(self, other: Self) -> Self {
        Self {
            completed: self.completed.saturating_add(other.completed),
            cancelled: self.cancelled.saturating_add(other.cancelled),
        }
    }
}

/// A live connection and its delivery lane.
struct Member {
    conn: Arc<dyn Connection>,
    /// Held by `attach` while the history replay runs. Also identifies this
    /// attachment: a reattach under the same id gets a new gate.
    gate: Arc<tokio::sync::Mutex<()>>,
    /// Completion signal of the most recently scheduled send.
    tail: Option<oneshot::Receiver<()>>,
    /// Sends scheduled and not yet finished.
    lag: Arc<AtomicUsize>,
}

impl Member {
    fn new(conn: Arc<dyn Connection>, gate: Arc<tokio::sync::Mutex<()>>) -> Self {
        Self {
            conn,
            gate,
            tail: None,
            lag: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// One scheduled send to one member.
struct Delivery {
    conn: Arc<dyn Connection>,
    gate: Arc<tokio::sync::Mutex<()>>,
    lag: Arc<AtomicUsize>,
    previous: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

/// How one [`Delivery`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Dropped,
    /// The member left before its turn came.
    Skipped,
}

/// Bookkeeping guarded by the Mirror's lock.
struct MirrorState {
    history: HistoryRing,
    members: BTreeMap<ConnectionId, Member>,
    in_flight: Vec<JoinHandle<RoundReport>>,
}

impl MirrorState {
    /// Whether `conn` is still attached under the attachment owning `gate`.
    fn is_member(&self, conn: &dyn Connection, gate: &Arc<tokio::sync::Mutex<()>>) -> bool {
        self.members
            .get(&conn.id())
            .is_some_and(|member| Arc::ptr_eq(&member.gate, gate))
    }
}

/// Per-worker buffered multicast primitive ("the Mirror").
pub struct HolographicBuffer {
    worker_id: WorkerId,
    send_timeout: Duration,
    max_lag: usize,
    state: Arc<Mutex<MirrorState>>,
    total_published: AtomicU64,
    draining: AtomicBool,
    runtime: Option<Handle>,
    span: Span,
}

impl core::fmt::Debug for HolographicBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HolographicBuffer")
            .field("worker_id", &self.worker_id)
            .field("observers", &self.observer_count())
            .field("history", &self.history_length())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

impl HolographicBuffer {
    /// Create a Mirror for `worker_id`.
    ///
    /// Fan-out rounds are spawned on the Tokio runtime current at
    /// construction, or at publish time if there was none.
    pub fn new(worker_id: WorkerId, config: &MirrorConfig) -> Self {
        let span = info_span!("mirror", worker_id = %worker_id);
        Self {
            worker_id,
            send_timeout: config.broadcast_timeout(),
            max_lag: config.max_lag_events.max(1),
            state: Arc::new(Mutex::new(MirrorState {
                history: HistoryRing::new(config.max_history),
                members: BTreeMap::new(),
                in_flight: Vec::new(),
            })),
            total_published: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            runtime: Handle::try_current().ok(),
            span,
        }
    }

    // -----------------------------------------------------------------------
    // Publish
    // -----------------------------------------------------------------------

    /// Record `event` and schedule its delivery to live observers.
    ///
    /// Never blocks on connection I/O and never fails. While draining, the
    /// event is still recorded but no fan-out is scheduled.
    pub fn publish(&self, event: Event) {
        self.total_published.fetch_add(1, Ordering::Relaxed);

        let lagging = {
            let mut state = self.state.lock();
            if state.members.is_empty() || self.is_draining() {
                state.history.push(event);
                return;
            }

            let frame = match serde_json::to_string(&event) {
                Ok(json) => Frame::from(json),
                Err(e) => {
                    warn!(parent: &self.span, event_id = %event.id, error = %e,
                        "failed to serialize event, skipping fan-out");
                    state.history.push(event);
                    return;
                }
            };
            state.history.push(event);
            self.schedule(&mut state, frame)
        };

        for conn in lagging {
            conn.close();
            info!(parent: &self.span, connection_id = %conn.id(), max_lag = self.max_lag,
                "observer dropped, too far behind");
        }
    }

    /// Queue `frame` on every member's lane and spawn the round.
    ///
    /// Returns the members removed for lagging; the caller closes them
    /// once the lock is released.
    fn schedule(&self, state: &mut MirrorState, frame: Frame) -> Vec<Arc<dyn Connection>> {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!(parent: &self.span, "no Tokio runtime available, skipping fan-out");
            return Vec::new();
        };

        let mut lagging = Vec::new();
        let mut deliveries = Vec::with_capacity(state.members.len());
        for (id, member) in &mut state.members {
            if member.lag.load(Ordering::Acquire) >= self.max_lag {
                lagging.push(*id);
                continue;
            }
            member.lag.fetch_add(1, Ordering::AcqRel);
            let (done, tail) = oneshot::channel();
            deliveries.push(Delivery {
                conn: Arc::clone(&member.conn),
                gate: Arc::clone(&member.gate),
                lag: Arc::clone(&member.lag),
                previous: member.tail.replace(tail),
                done,
            });
        }
        let lagging = lagging
            .iter()
            .filter_map(|id| state.members.remove(id))
            .map(|member| member.conn)
            .collect();

        if !deliveries.is_empty() {
            let round = run_round(
                Arc::clone(&self.state),
                frame,
                deliveries,
                self.send_timeout,
            )
            .instrument(self.span.clone());
            state.in_flight.retain(|handle| !handle.is_finished());
            state.in_flight.push(runtime.spawn(round));
        }
        lagging
    }

    // -----------------------------------------------------------------------
    // Attach / Detach
    // -----------------------------------------------------------------------

    /// Add `conn` to the live set and replay the buffered history to it.
    ///
    /// Replay sends are bounded by the per-send timeout; a failed replay
    /// send is logged and skipped, it does not detach the connection.
    /// Returns the number of history events delivered.
    pub async fn attach(&self, conn: Arc<dyn Connection>) -> usize {
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        let replay_guard = Arc::clone(&gate).lock_owned().await;

        let ghost = {
            let mut state = self.state.lock();
            state
                .members
                .insert(conn.id(), Member::new(Arc::clone(&conn), gate));
            state.history.snapshot()
        };

        let mut delivered: usize = 0;
        for event in &ghost {
            let frame = match serde_json::to_string(event) {
                Ok(json) => Frame::from(json),
                Err(e) => {
                    warn!(parent: &self.span, event_id = %event.id, error = %e,
                        "failed to serialize history event, skipping");
                    continue;
                }
            };
            match tokio::time::timeout(self.send_timeout, conn.send(frame)).await {
                Ok(Ok(())) => delivered = delivered.saturating_add(1),
                Ok(Err(e)) => {
                    debug!(parent: &self.span, connection_id = %conn.id(), event_id = %event.id,
                        error = %e, "history replay send failed, skipping");
                }
                Err(_elapsed) => {
                    debug!(parent: &self.span, connection_id = %conn.id(), event_id = %event.id,
                        "history replay send timed out, skipping");
                }
            }
        }
        drop(replay_guard);

        info!(
            parent: &self.span,
            connection_id = %conn.id(),
            replayed = delivered,
            history = ghost.len(),
            observers = self.observer_count(),
            "observer attached"
        );
        delivered
    }

    /// Remove a connection from the live set. Idempotent.
    ///
    /// Returns whether the connection was present. The connection is not
    /// closed; its owner decides that.
    pub fn detach(&self, id: ConnectionId) -> bool {
        let removed = self.state.lock().members.remove(&id).is_some();
        if removed {
            debug!(parent: &self.span, connection_id = %id, "observer detached");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Drain / Shutdown
    // -----------------------------------------------------------------------

    /// Stop scheduling fan-out and wait up to `timeout` for in-flight
    /// rounds; rounds still running afterwards are aborted.
    ///
    /// Events published after this call are still recorded in history.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let handles = {
            let mut state = self.state.lock();
            self.draining.store(true, Ordering::Release);
            std::mem::take(&mut state.in_flight)
        };

        let started = Instant::now();
        let mut report = DrainReport::default();
        for mut handle in handles {
            let remaining = timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(_round)) => report.completed = report.completed.saturating_add(1),
                Ok(Err(e)) => {
                    warn!(parent: &self.span, error = %e, "fan-out round ended abnormally");
                    report.cancelled = report.cancelled.saturating_add(1);
                }
                Err(_elapsed) => {
                    handle.abort();
                    report.cancelled = report.cancelled.saturating_add(1);
                }
            }
        }

        if report.cancelled > 0 {
            warn!(parent: &self.span, completed = report.completed, cancelled = report.cancelled,
                "drain deadline reached, in-flight broadcasts cancelled");
        } else {
            debug!(parent: &self.span, completed = report.completed, "drain complete");
        }
        report
    }

    /// Drain, then forget every live connection without closing it.
    pub async fn shutdown(&self, timeout: Duration) -> DrainReport {
        let report = self.drain(timeout).await;
        let cleared = {
            let mut state = self.state.lock();
            let count = state.members.len();
            state.members.clear();
            count
        };
        info!(parent: &self.span, cleared, completed = report.completed,
            cancelled = report.cancelled, "mirror shut down");
        report
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The worker this Mirror belongs to.
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Number of live connections.
    pub fn observer_count(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Number of events currently held for replay.
    pub fn history_length(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Configured history capacity.
    pub fn capacity(&self) -> usize {
        self.state.lock().history.capacity()
    }

    /// Point-in-time copy of the history, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.state.lock().history.snapshot()
    }

    /// Events published since construction, including evicted ones.
    pub fn total_events_published(&self) -> u64 {
        self.total_published.load(Ordering::Relaxed)
    }

    /// Fan-out rounds scheduled but not yet finished.
    pub fn pending_fan_out_count(&self) -> usize {
        self.state
            .lock()
            .in_flight
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Whether [`drain`](Self::drain) has been called.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

/// One fan-out round: every member's send runs on its own lane,
/// concurrently with the others.
async fn run_round(
    state: Arc<Mutex<MirrorState>>,
    frame: Frame,
    deliveries: Vec<Delivery>,
    send_timeout: Duration,
) -> RoundReport {
    let sends = deliveries
        .into_iter()
        .map(|delivery| deliver(&state, Frame::clone(&frame), delivery, send_timeout));
    let outcomes = futures::future::join_all(sends).await;

    let mut report = RoundReport::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Delivered => report.delivered = report.delivered.saturating_add(1),
            Outcome::Dropped => report.dropped = report.dropped.saturating_add(1),
            Outcome::Skipped => {}
        }
    }
    report
}

/// Wait for the member's previous send, then send `frame` within
/// `send_timeout`. A failed member is removed before its lane moves on.
async fn deliver(
    state: &Mutex<MirrorState>,
    frame: Frame,
    delivery: Delivery,
    send_timeout: Duration,
) -> Outcome {
    let Delivery {
        conn,
        gate,
        lag,
        previous,
        done,
    } = delivery;

    if let Some(previous) = previous {
        // An aborted predecessor drops its sender; either way it is over.
        let _ = previous.await;
    }

    let attached = state.lock().is_member(conn.as_ref(), &gate);
    let outcome = if attached {
        let attempt = async {
            let _replayed = gate.lock().await;
            conn.send(frame).await
        };
        match tokio::time::timeout(send_timeout, attempt)
            .await
            .unwrap_or(Err(ConnectionError::Timeout))
        {
            Ok(()) => Outcome::Delivered,
            Err(reason) => {
                let removed = {
                    let mut guard = state.lock();
                    let attached = guard.is_member(conn.as_ref(), &gate);
                    if attached {
                        guard.members.remove(&conn.id());
                    }
                    attached
                };
                if removed {
                    conn.close();
                    info!(connection_id = %conn.id(), reason = %reason, "observer dropped");
                    Outcome::Dropped
                } else {
                    Outcome::Skipped
                }
            }
        }
    } else {
        Outcome::Skipped
    };

    lag.fetch_sub(1, Ordering::AcqRel);
    let _ = done.send(());
    outcome
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use holomirror_types::Payload;

    use super::*;
    use crate::connection::ChannelConnection;

    fn config(max_history: usize) -> MirrorConfig {
        MirrorConfig {
            max_history,
            broadcast_timeout_ms: 50,
            max_lag_events: 16,
        }
    }

    fn named(name: &str) -> Event {
        Event::custom(WorkerId::from("w1"), name, Payload::new())
    }

    #[tokio::test]
    async fn publish_without_observers_only_records() {
        let mirror = HolographicBuffer::new(WorkerId::from("w1"), &config(10));
        mirror.publish(named("a"));
        mirror.publish(named("b"));
        assert_eq!(mirror.history_length(), 2);
        assert_eq!(mirror.total_events_published(), 2);
        assert_eq!(mirror.pending_fan_out_count(), 0);
    }

    #[tokio::test]
    async fn total_counts_evicted_events() {
        let mirror = HolographicBuffer::new(WorkerId::from("w1"), &config(2));
        for name in ["a", "b", "c", "d"] {
            mirror.publish(named(name));
        }
        assert_eq!(mirror.history_length(), 2);
        assert_eq!(mirror.total_events_published(), 4);
        assert_eq!(mirror.capacity(), 2);
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let mirror = HolographicBuffer::new(WorkerId::from("w1"), &config(10));
        let (conn, _rx) = ChannelConnection::new(8);
        let id = conn.id();
        mirror.attach(Arc::new(conn)).await;
        assert_eq!(mirror.observer_count(), 1);
        assert!(mirror.detach(id));
        assert!(!mirror.detach(id));
        assert_eq!(mirror.observer_count(), 0);
    }

    #[tokio::test]
    async fn drain_with_nothing_in_flight_is_empty() {
        let mirror = HolographicBuffer::new(WorkerId::from("w1"), &config(10));
        let report = mirror.drain(Duration::from_millis(10)).await;
        assert_eq!(report, DrainReport::default());
        assert!(mirror.is_draining());
    }

    #[test]
    fn drain_reports_merge() {
        let a = DrainReport {
            completed: 2,
            cancelled: 1,
        };
        let b = DrainReport {
            completed: 3,
            cancelled: 0,
        };
        assert_eq!(
            a.merge(b),
            DrainReport {
                completed: 5,
                cancelled: 1
            }
        );
    }

    #[test]
    fn publish_outside_runtime_still_records() {
        let mirror = HolographicBuffer::new(WorkerId::from("w1"), &config(4));
        mirror.publish(named("a"));
        assert_eq!(mirror.history_length(), 1);
    }
}
