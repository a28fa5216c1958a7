//! HTTP + `WebSocket` gateway for Holomirror.
//!
//! This crate exposes registered workers over the network:
//!
//! - **Observe channel** (`/observe/{worker_id}`): attaches a socket to the
//!   worker's Mirror; the client gets the buffered history, then the live
//!   stream, with heartbeats and idle disconnect
//! - **Perturb channel** (`/perturb/{worker_id}`): forwards JSON payloads to
//!   the worker's `invoke` and replies with the outcome, optionally behind a
//!   token gate
//! - **REST endpoints** for worker listing, per-worker snapshots, and
//!   health/readiness probes
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! The [`Registry`] owns one Mirror and one metabolism loop per worker.
//! Socket handlers never talk to a worker's event stream directly: they
//! attach a [`ChannelConnection`](holomirror_core::ChannelConnection) to the
//! Mirror and forward what it queues. Shutdown is driven by the
//! [`ShutdownCoordinator`], which cancels the shared token every session
//! watches and then drains every Mirror.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::{GatewayError, RegistryError};
pub use registry::{Registry, WorkerEntry};
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use startup::{RunningGateway, StartupError, spawn_gateway};
pub use state::AppState;
