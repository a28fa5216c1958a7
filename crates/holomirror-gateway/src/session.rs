//! Transport-independent observe and inject session loops.
//!
//! Both loops talk to the client through a [`Sink`] of [`ServerMessage`]
//! and a [`Stream`] of [`ClientMessage`]. The `WebSocket` handlers in
//! [`crate::ws`] adapt Axum's socket halves to these; tests drive the loops
//! with in-memory channels.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use holomirror_core::{Frame, HolographicBuffer, WorkerHandle};
use holomirror_types::{ControlFrame, Event, InjectReply, InjectRequest};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest wait a timer is ever armed for.
const MAX_WAIT: Duration = Duration::from_secs(31_536_000);

/// Message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
    /// Protocol-level ping or pong.
    KeepAlive,
    /// The client asked to close.
    Close,
}

/// Message sent to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A text frame.
    Text(String),
    /// Close the connection.
    Close,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent a close frame or went away.
    ClientClosed,
    /// No inbound traffic within the idle timeout.
    IdleTimeout,
    /// The Mirror dropped this observer.
    Dropped,
    /// The gateway is shutting down.
    Shutdown,
    /// Reading from or writing to the transport failed.
    TransportError,
}

/// Timers for an observe session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveSettings {
    /// Send a ping after this long without outbound traffic.
    pub heartbeat: Duration,
    /// End the session after this long without inbound traffic.
    pub idle_timeout: Option<Duration>,
}

fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after.min(MAX_WAIT)).unwrap_or(from)
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Observe
// ---------------------------------------------------------------------------

/// Forward queued Mirror frames to the client until the session ends.
///
/// `frames` is the receiving half of the observer's `ChannelConnection`;
/// `dropped` is its closed token, cancelled when the Mirror drops it.
/// The caller is responsible for detaching from the Mirror afterwards.
pub async fn run_observe<Si, St, SE, RE>(
    sink: Si,
    stream: St,
    mut frames: mpsc::Receiver<Frame>,
    dropped: CancellationToken,
    shutdown: CancellationToken,
    settings: ObserveSettings,
) -> SessionEnd
where
    Si: Sink<ServerMessage, Error = SE>,
    St: Stream<Item = Result<ClientMessage, RE>>,
    SE: core::fmt::Display,
    RE: core::fmt::Display,
{
    futures::pin_mut!(sink);
    futures::pin_mut!(stream);

    let ping = match serde_json::to_string(&ControlFrame::Ping) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize ping frame");
            return SessionEnd::TransportError;
        }
    };

    let mut last_outbound = Instant::now();
    let mut last_inbound = last_outbound;

    let end = loop {
        let heartbeat_at = deadline(last_outbound, settings.heartbeat);
        let idle_at = settings.idle_timeout.map(|idle| deadline(last_inbound, idle));

        tokio::select! {
            biased;
            () = shutdown.cancelled() => break SessionEnd::Shutdown,
            () = dropped.cancelled() => break SessionEnd::Dropped,
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    break SessionEnd::Dropped;
                };
                if let Err(e) = sink.send(ServerMessage::Text(frame.to_string())).await {
                    debug!(error = %e, "observe send failed");
                    break SessionEnd::TransportError;
                }
                last_outbound = Instant::now();
            }
            message = stream.next() => {
                match message {
                    None | Some(Ok(ClientMessage::Close)) => break SessionEnd::ClientClosed,
                    Some(Err(e)) => {
                        debug!(error = %e, "observe receive failed");
                        break SessionEnd::TransportError;
                    }
                    // Anything else only proves the client is alive.
                    Some(Ok(_)) => last_inbound = Instant::now(),
                }
            }
            () = tokio::time::sleep_until(heartbeat_at) => {
                if let Err(e) = sink.send(ServerMessage::Text(ping.clone())).await {
                    debug!(error = %e, "heartbeat send failed");
                    break SessionEnd::TransportError;
                }
                last_outbound = Instant::now();
            }
            () = sleep_until_opt(idle_at) => break SessionEnd::IdleTimeout,
        }
    };

    if end != SessionEnd::TransportError && end != SessionEnd::ClientClosed {
        let _ = sink.send(ServerMessage::Close).await;
    }
    end
}

// ---------------------------------------------------------------------------
// Inject
// ---------------------------------------------------------------------------

/// Handle one inject message and build the reply.
///
/// A well-formed request is forwarded to the worker and its outcome is
/// also published on the worker's Mirror as a `result` or `error` event.
pub async fn handle_inject(
    text: &str,
    worker: &dyn WorkerHandle,
    mirror: &HolographicBuffer,
) -> InjectReply {
    let request: InjectRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => return InjectReply::failure(format!("invalid message: {e}")),
    };

    match worker.invoke(request.data).await {
        Ok(result) => {
            mirror.publish(Event::result(mirror.worker_id().clone(), result.clone()));
            InjectReply::success(result)
        }
        Err(e) => {
            let message = e.to_string();
            mirror.publish(Event::error(mirror.worker_id().clone(), message.clone()));
            InjectReply::failure(message)
        }
    }
}

/// Serve inject requests from the client until the session ends.
///
/// Requests are handled one at a time, so replies arrive in request order.
pub async fn run_perturb<Si, St, SE, RE>(
    sink: Si,
    stream: St,
    worker: Arc<dyn WorkerHandle>,
    mirror: Arc<HolographicBuffer>,
    shutdown: CancellationToken,
) -> SessionEnd
where
    Si: Sink<ServerMessage, Error = SE>,
    St: Stream<Item = Result<ClientMessage, RE>>,
    SE: core::fmt::Display,
    RE: core::fmt::Display,
{
    futures::pin_mut!(sink);
    futures::pin_mut!(stream);

    let end = loop {
        let message = tokio::select! {
            biased;
            () = shutdown.cancelled() => break SessionEnd::Shutdown,
            message = stream.next() => message,
        };

        let reply = match message {
            None | Some(Ok(ClientMessage::Close)) => break SessionEnd::ClientClosed,
            Some(Err(e)) => {
                debug!(error = %e, "inject receive failed");
                break SessionEnd::TransportError;
            }
            Some(Ok(ClientMessage::KeepAlive)) => continue,
            Some(Ok(ClientMessage::Binary(_))) => {
                InjectReply::failure("binary frames are not supported")
            }
            Some(Ok(ClientMessage::Text(text))) => {
                handle_inject(&text, worker.as_ref(), &mirror).await
            }
        };

        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize inject reply");
                continue;
            }
        };
        if let Err(e) = sink.send(ServerMessage::Text(json)).await {
            debug!(error = %e, "inject reply send failed");
            break SessionEnd::TransportError;
        }
    };

    if end == SessionEnd::Shutdown {
        let _ = sink.send(ServerMessage::Close).await;
    }
    end
}
