//! Shared type definitions for Holomirror.
//!
//! This crate is the single source of truth for the records that flow from
//! a worker, through its Mirror, to every observer. Types flow downstream to
//! `TypeScript` via `ts-rs` for dashboard clients.
//!
//! # Modules
//!
//! - [`ids`] -- Event, connection, and worker identifiers
//! - [`enums`] -- Event kinds and worker state
//! - [`structs`] -- The [`Event`] record, typed payloads, and socket envelopes

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{EventKind, WorkerState};
pub use ids::{ConnectionId, EventId, WorkerId};
pub use structs::{
    ControlFrame, Event, InjectReply, InjectRequest, LifecycleTotals, MetabolismSample, Payload,
    WorkerList, WorkerMetadata, WorkerSnapshot, WorkerSummary, to_payload,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs writes bindings when `export_all` runs; the files land in
        // `bindings/` relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::EventId::export_all();
        let _ = crate::ids::ConnectionId::export_all();
        let _ = crate::ids::WorkerId::export_all();

        // Enums
        let _ = crate::enums::EventKind::export_all();
        let _ = crate::enums::WorkerState::export_all();

        // Structs
        let _ = crate::structs::Event::export_all();
        let _ = crate::structs::MetabolismSample::export_all();
        let _ = crate::structs::LifecycleTotals::export_all();
        let _ = crate::structs::InjectRequest::export_all();
        let _ = crate::structs::InjectReply::export_all();
        let _ = crate::structs::ControlFrame::export_all();
        let _ = crate::structs::WorkerSummary::export_all();
        let _ = crate::structs::WorkerList::export_all();
        let _ = crate::structs::WorkerSnapshot::export_all();
    }
}
