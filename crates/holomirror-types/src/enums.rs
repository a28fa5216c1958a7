//! Enumeration types shared by the Mirror, the gateway, and clients.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The kind of an observable [`Event`](crate::Event).
///
/// Serialized in `snake_case` under the event's `"type"` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventKind {
    /// The worker produced a result (including inject replies).
    Result,
    /// The worker reported an error.
    Error,
    /// A periodic metabolism sample (pressure, flow, temperature).
    Metabolism,
    /// The worker stopped; carries cumulative totals.
    LifecycleStopped,
    /// Application-defined event; the name lives under `payload.name`.
    Custom,
}

impl EventKind {
    /// Wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Result => "result",
            Self::Error => "error",
            Self::Metabolism => "metabolism",
            Self::LifecycleStopped => "lifecycle_stopped",
            Self::Custom => "custom",
        }
    }
}

/// Coarse lifecycle state of a registered worker, as reported by the
/// snapshot and listing endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum WorkerState {
    /// The worker reports it is still running.
    Running,
    /// The worker has stopped; its Mirror keeps serving history.
    Stopped,
}

impl WorkerState {
    /// Map a running flag to a state.
    pub const fn from_running(running: bool) -> Self {
        if running { Self::Running } else { Self::Stopped }
    }

    /// Wire name, identical to the serde representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}
