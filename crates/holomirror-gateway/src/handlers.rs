//! REST endpoint handlers for the gateway.
//!
//! All handlers read from the [`Registry`](crate::registry::Registry) and
//! the Mirrors it owns; none of them ever touches a worker directly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/workers` | List registered workers |
//! | `GET` | `/api/{worker_id}/snapshot` | Buffered history + state of one worker |
//! | `GET` | `/health` | Liveness |
//! | `GET` | `/ready` | Readiness (at least one worker registered) |

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};
use holomirror_types::{WorkerId, WorkerList, WorkerSnapshot};

use crate::error::GatewayError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page listing workers and endpoints.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summaries = state.registry.summaries();
    let status = if state.is_shutting_down() {
        "DRAINING"
    } else {
        "RUNNING"
    };

    let mut rows = String::new();
    for summary in &summaries {
        let id = escape_html(summary.worker_id.as_str());
        let _ = write!(
            rows,
            r#"
        <tr>
            <td><a href="/api/{id}/snapshot">{id}</a></td>
            <td>{state}</td>
            <td>{observers}</td>
            <td>{events}</td>
            <td>{history}</td>
        </tr>"#,
            state = summary.state.as_str(),
            observers = summary.observer_count,
            events = summary.total_events,
            history = summary.history_length,
        );
    }
    if rows.is_empty() {
        rows.push_str(r#"<tr><td colspan="5">No workers registered</td></tr>"#);
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Holomirror Gateway</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        table {{ border-collapse: collapse; width: 100%; }}
        th, td {{ border-bottom: 1px solid #30363d; padding: 0.4rem; text-align: left; }}
        th {{ color: #8b949e; font-weight: normal; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        a:hover {{ text-decoration: underline; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        .status {{ color: #3fb950; font-weight: bold; }}
        hr {{ border: none; border-top: 1px solid #30363d; margin: 1.5rem 0; }}
    </style>
</head>
<body>
    <h1>Holomirror Gateway</h1>
    <p class="subtitle">Observe and perturb long-running workers</p>

    <p>Status: <span class="status">{status}</span> -- {count} worker(s)</p>

    <table>
        <tr><th>Worker</th><th>State</th><th>Observers</th><th>Events</th><th>History</th></tr>{rows}
    </table>

    <hr>

    <h2>API Endpoints</h2>
    <ul>
        <li>GET <a href="/api/workers">/api/workers</a> -- List workers</li>
        <li>GET /api/{{worker_id}}/snapshot -- Buffered history of one worker</li>
        <li>GET <a href="/health">/health</a> -- Liveness</li>
        <li>GET <a href="/ready">/ready</a> -- Readiness</li>
    </ul>

    <h2>WebSocket</h2>
    <ul>
        <li><code>ws://host:port/observe/{{worker_id}}</code> -- Replay + live event stream</li>
        <li><code>ws://host:port/perturb/{{worker_id}}</code> -- Inject channel</li>
    </ul>
</body>
</html>"#,
        count = summaries.len(),
    ))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// GET /api/workers
// ---------------------------------------------------------------------------

/// List every registered worker, ordered by id.
pub async fn list_workers(State(state): State<Arc<AppState>>) -> Json<WorkerList> {
    let workers = state.registry.summaries();
    Json(WorkerList {
        count: workers.len(),
        workers,
    })
}

// ---------------------------------------------------------------------------
// GET /api/{worker_id}/snapshot
// ---------------------------------------------------------------------------

/// Return a worker's state, metadata and buffered history.
pub async fn get_snapshot(
    Path(worker_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<WorkerSnapshot>, GatewayError> {
    let entry = state.registry.require(&WorkerId::from(worker_id))?;
    Ok(Json(entry.snapshot()))
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness probe: ready once at least one worker is registered and the
/// gateway is not shutting down.
pub async fn ready(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, GatewayError> {
    if state.is_shutting_down() {
        return Err(GatewayError::NotReady("gateway is shutting down".to_owned()));
    }
    let workers = state.registry.len();
    if workers == 0 {
        return Err(GatewayError::NotReady("no workers registered".to_owned()));
    }
    Ok(Json(serde_json::json!({ "ready": true, "workers": workers })))
}
