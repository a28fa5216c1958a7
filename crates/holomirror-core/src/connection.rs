//! Transport-agnostic observer connections.
//!
//! The Mirror only ever talks to [`Connection`] trait objects. The gateway
//! plugs in [`ChannelConnection`], which queues frames for a socket writer
//! task; tests plug in whatever behaviour they need (slow, failing, ...).

use std::sync::Arc;

use futures::future::BoxFuture;
use holomirror_types::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;

/// One serialized event, shared by every recipient of a fan-out round.
pub type Frame = Arc<str>;

/// A duplex channel capability the Mirror can push frames into.
///
/// Implementations must be cheap to clone behind an [`Arc`] and must not
/// block the caller in `close`.
pub trait Connection: Send + Sync {
    /// Stable identifier used for detach and logging.
    fn id(&self) -> ConnectionId;

    /// Deliver one frame. The Mirror bounds every call with its own
    /// timeout, so implementations may wait for buffer space.
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Signal that no further frames will be sent.
    fn close(&self);
}

/// [`Connection`] backed by a bounded queue drained by a transport task.
///
/// The queue capacity is the observer's lag allowance: once it is full,
/// `send` waits for space, the Mirror's timeout fires, and the observer is
/// detached.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl ChannelConnection {
    /// Create a connection and the receiving half its transport drains.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: ConnectionId::new(),
            tx,
            closed: CancellationToken::new(),
        };
        (conn, rx)
    }

    /// Token cancelled once [`Connection::close`] is called.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            if self.closed.is_cancelled() {
                return Err(ConnectionError::Closed);
            }
            tokio::select! {
                biased;
                () = self.closed.cancelled() => Err(ConnectionError::Closed),
                sent = self.tx.send(frame) => sent.map_err(|_closed| ConnectionError::Closed),
            }
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (conn, mut rx) = ChannelConnection::new(4);
        conn.send(Frame::from("a")).await.unwrap();
        conn.send(Frame::from("b")).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (conn, _rx) = ChannelConnection::new(1);
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.send(Frame::from("x")).await, Err(ConnectionError::Closed));
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (conn, rx) = ChannelConnection::new(1);
        drop(rx);
        assert_eq!(conn.send(Frame::from("x")).await, Err(ConnectionError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_waits_for_space() {
        let (conn, _rx) = ChannelConnection::new(1);
        conn.send(Frame::from("first")).await.unwrap();
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            conn.send(Frame::from("second")),
        )
        .await;
        assert!(second.is_err());
    }
}
