//! `WebSocket` endpoints: observe and perturb.
//!
//! Both handlers resolve the worker (and, for perturb, check the token)
//! before upgrading, so an unknown worker gets a plain `404` and a bad
//! token a plain `401`. After the upgrade the socket halves are adapted to
//! the transport-independent loops in [`crate::session`].

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{Sink, SinkExt, Stream, StreamExt};
use holomirror_core::{ChannelConnection, Connection};
use holomirror_types::WorkerId;
use tracing::{Instrument, debug, info, info_span};

use crate::auth::{AuthQuery, authorize};
use crate::error::GatewayError;
use crate::session::{self, ClientMessage, ObserveSettings, ServerMessage};
use crate::state::AppState;

impl From<ServerMessage> for Message {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::Text(text) => Self::Text(text.into()),
            ServerMessage::Close => Self::Close(None),
        }
    }
}

impl From<Message> for ClientMessage {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => Self::Binary(bytes.to_vec()),
            Message::Ping(_) | Message::Pong(_) => Self::KeepAlive,
            Message::Close(_) => Self::Close,
        }
    }
}

/// Split an Axum socket into the halves the session loops expect.
fn split_socket(
    socket: WebSocket,
) -> (
    impl Sink<ServerMessage, Error = axum::Error>,
    impl Stream<Item = Result<ClientMessage, axum::Error>>,
) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|message: ServerMessage| {
        futures::future::ready(Ok::<Message, axum::Error>(message.into()))
    });
    let stream = stream.map(|message| message.map(ClientMessage::from));
    (sink, stream)
}

/// Attach an observer to a worker's Mirror.
///
/// # Route
///
/// `GET /observe/{worker_id}`
pub async fn observe(
    Path(worker_id): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, GatewayError> {
    let entry = state.registry.require(&WorkerId::from(worker_id))?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let (conn, frames) = ChannelConnection::new(state.max_lag_events);
    let connection_id = conn.id();
    let dropped = conn.closed_token();
    let settings = ObserveSettings {
        heartbeat: state.gateway.heartbeat_interval(),
        idle_timeout: state.gateway.idle_timeout(),
    };
    let span = info_span!("observe", worker_id = %entry.worker_id(), %connection_id);

    Ok(ws.on_upgrade(move |socket| {
        async move {
            let mirror = Arc::clone(entry.mirror());
            let (sink, stream) = split_socket(socket);
            let session = session::run_observe(
                sink,
                stream,
                frames,
                dropped,
                state.shutdown.clone(),
                settings,
            );
            // Replay streams through the queue while the session drains it.
            let (_, end) = tokio::join!(mirror.attach(Arc::new(conn)), session);
            mirror.detach(connection_id);
            info!(reason = ?end, "observe session ended");
        }
        .instrument(span)
    }))
}

/// Open an inject channel to a worker.
///
/// # Route
///
/// `GET /perturb/{worker_id}`
pub async fn perturb(
    Path(worker_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, GatewayError> {
    authorize(&state.gateway, &headers, &query)?;
    let entry = state.registry.require(&WorkerId::from(worker_id))?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let span = info_span!("perturb", worker_id = %entry.worker_id());
    Ok(ws.on_upgrade(move |socket| {
        async move {
            debug!("inject channel opened");
            let (sink, stream) = split_socket(socket);
            let end = session::run_perturb(
                sink,
                stream,
                Arc::clone(entry.handle()),
                Arc::clone(entry.mirror()),
                state.shutdown.clone(),
            )
            .await;
            info!(reason = ?end, "inject channel closed");
        }
        .instrument(span)
    }))
}
