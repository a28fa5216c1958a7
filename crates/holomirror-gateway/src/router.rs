//! Axum router construction for the gateway.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS enabled for browser dashboards.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router for the gateway.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /observe/{worker_id}` -- replay + live event stream (`WebSocket`)
/// - `GET /perturb/{worker_id}` -- inject channel (`WebSocket`)
/// - `GET /api/workers` -- worker listing
/// - `GET /api/{worker_id}/snapshot` -- one worker's buffered history
/// - `GET /health` -- liveness
/// - `GET /ready` -- readiness
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status page
        .route("/", get(handlers::index))
        // WebSocket
        .route("/observe/{worker_id}", get(ws::observe))
        .route("/perturb/{worker_id}", get(ws::perturb))
        // REST API
        .route("/api/workers", get(handlers::list_workers))
        .route("/api/{worker_id}/snapshot", get(handlers::get_snapshot))
        // Probes
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
