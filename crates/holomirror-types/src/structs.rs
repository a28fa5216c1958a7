//! Event record and wire-level message structs.
//!
//! [`Event`] is the single unit the Mirror stores and fans out. The other
//! structs are typed payloads ([`MetabolismSample`], [`LifecycleTotals`])
//! and the small JSON envelopes spoken on the gateway's sockets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EventKind, WorkerState};
use crate::ids::{EventId, WorkerId};

/// Opaque key/value payload carried by an [`Event`].
pub type Payload = BTreeMap<String, serde_json::Value>;

/// Free-form metadata attached to a worker at registration.
pub type WorkerMetadata = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An immutable observable occurrence emitted by a worker.
///
/// Events are values: once published they are never mutated. The Mirror
/// keeps the most recent ones for replay and sends each one, serialized
/// once, to every live observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Unique event identifier.
    pub id: EventId,
    /// Discriminant of the event.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The worker that emitted the event.
    pub worker_id: WorkerId,
    /// Wall-clock time the event was created.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload.
    pub payload: Payload,
}

impl Event {
    /// Create an event of the given kind stamped with the current time.
    pub fn new(kind: EventKind, worker_id: WorkerId, payload: Payload) -> Self {
        Self {
            id: EventId::new(),
            kind,
            worker_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// A `result` event wrapping an arbitrary JSON value under `"result"`.
    pub fn result(worker_id: WorkerId, result: serde_json::Value) -> Self {
        let mut payload = Payload::new();
        payload.insert(String::from("result"), result);
        Self::new(EventKind::Result, worker_id, payload)
    }

    /// An `error` event carrying a message under `"error"`.
    pub fn error(worker_id: WorkerId, message: impl Into<String>) -> Self {
        let mut payload = Payload::new();
        payload.insert(
            String::from("error"),
            serde_json::Value::String(message.into()),
        );
        Self::new(EventKind::Error, worker_id, payload)
    }

    /// A `metabolism` event built from a sample.
    pub fn metabolism(worker_id: WorkerId, sample: &MetabolismSample) -> Self {
        Self::new(EventKind::Metabolism, worker_id, to_payload(sample))
    }

    /// A `lifecycle_stopped` event built from cumulative totals.
    pub fn stopped(worker_id: WorkerId, totals: &LifecycleTotals) -> Self {
        Self::new(EventKind::LifecycleStopped, worker_id, to_payload(totals))
    }

    /// A `custom` event; `name` is stored under `payload.name`.
    pub fn custom(worker_id: WorkerId, name: impl Into<String>, mut payload: Payload) -> Self {
        payload.insert(String::from("name"), serde_json::Value::String(name.into()));
        Self::new(EventKind::Custom, worker_id, payload)
    }
}

/// Convert a serializable struct into an event payload.
///
/// Anything that does not serialize to a JSON object yields an empty map.
pub fn to_payload<T: Serialize>(value: &T) -> Payload {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => Payload::new(),
    }
}

// ---------------------------------------------------------------------------
// Metabolism payloads
// ---------------------------------------------------------------------------

/// One periodic reading of a worker's internal counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MetabolismSample {
    /// Backlog normalized to `0..=100`.
    pub pressure: f64,
    /// Events processed per second since the previous sample.
    pub flow: f64,
    /// Worker-supplied heat clamped to `0..=1`.
    pub temperature: f64,
    /// Raw backlog depth at sample time.
    pub backlog: u64,
    /// Events processed since the previous sample.
    pub processed_delta: u64,
    /// Wall time covered by this sample, in milliseconds.
    pub elapsed_ms: u64,
}

/// Cumulative totals published once when a worker stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LifecycleTotals {
    /// Number of metabolism samples published.
    pub samples: u64,
    /// Total events the worker reported as processed.
    pub processed_total: u64,
    /// Milliseconds between loop start and stop.
    pub uptime_ms: u64,
}

// ---------------------------------------------------------------------------
// Gateway envelopes
// ---------------------------------------------------------------------------

/// Inbound message on the inject channel: `{"data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct InjectRequest {
    /// Payload forwarded verbatim to the worker.
    pub data: serde_json::Value,
}

/// Reply sent back on the inject channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum InjectReply {
    /// `{"success": true, "result": <payload>}`
    Success {
        /// Always `true`.
        success: bool,
        /// Value returned by the worker.
        result: serde_json::Value,
    },
    /// `{"error": <message>}`
    Failure {
        /// Human-readable failure description.
        error: String,
    },
}

impl InjectReply {
    /// Successful reply.
    pub const fn success(result: serde_json::Value) -> Self {
        Self::Success {
            success: true,
            result,
        }
    }

    /// Failure reply.
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }
}

/// Server-originated control message on the observe channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ControlFrame {
    /// `{"type":"ping"}`, sent when the connection has been idle.
    Ping,
}

/// Row of the `GET /api/workers` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkerSummary {
    /// Worker identifier.
    pub worker_id: WorkerId,
    /// Running or stopped.
    pub state: WorkerState,
    /// Currently attached observers.
    pub observer_count: usize,
    /// Events published since registration.
    pub total_events: u64,
    /// Events currently held for replay.
    pub history_length: usize,
}

/// Body of `GET /api/workers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkerList {
    /// Number of registered workers.
    pub count: usize,
    /// One row per worker, ordered by id.
    pub workers: Vec<WorkerSummary>,
}

/// Body of `GET /api/{worker_id}/snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WorkerSnapshot {
    /// Worker identifier.
    pub worker_id: WorkerId,
    /// Running or stopped.
    pub state: WorkerState,
    /// Metadata supplied at registration.
    pub metadata: WorkerMetadata,
    /// Buffered history, oldest first.
    pub history: Vec<Event>,
    /// Events published since registration, including evicted ones.
    pub total_events: u64,
    /// Currently attached observers.
    pub observer_count: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_uses_type_key_on_the_wire() {
        let event = Event::result(WorkerId::from("w1"), serde_json::json!(42));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["worker_id"], "w1");
        assert_eq!(json["payload"]["result"], 42);
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::custom(WorkerId::from("w1"), "checkpoint", Payload::new());
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.payload["name"], "checkpoint");
    }

    #[test]
    fn inject_reply_shapes() {
        let ok = serde_json::to_value(InjectReply::success(serde_json::json!({"x": 1}))).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "result": {"x": 1}}));

        let err = serde_json::to_value(InjectReply::failure("boom")).unwrap();
        assert_eq!(err, serde_json::json!({"error": "boom"}));
    }

    #[test]
    fn ping_frame_shape() {
        let json = serde_json::to_string(&ControlFrame::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn metabolism_payload_carries_all_fields() {
        let sample = MetabolismSample {
            pressure: 12.5,
            flow: 3.0,
            temperature: 0.25,
            backlog: 125,
            processed_delta: 3,
            elapsed_ms: 1000,
        };
        let event = Event::metabolism(WorkerId::from("w1"), &sample);
        assert_eq!(event.kind, EventKind::Metabolism);
        assert_eq!(event.payload["backlog"], 125);
        assert_eq!(event.payload["elapsed_ms"], 1000);
    }
}
