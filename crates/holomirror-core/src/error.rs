//! Error types shared by the Mirror and its collaborators.
//!
//! None of these ever reach the worker: connection errors are absorbed by
//! the Mirror (the connection is dropped), and invocation errors are handed
//! back to whoever called the inject channel.

/// Failure to deliver one frame to one connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The connection was closed by either side.
    #[error("connection closed")]
    Closed,

    /// The send did not complete within the per-send timeout.
    #[error("send timed out")]
    Timeout,

    /// The transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure reported by a worker's `invoke` operation.
///
/// The message is passed verbatim to the inject caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// The worker rejected the payload.
    #[error("{0}")]
    Rejected(String),

    /// The worker is no longer running.
    #[error("worker is not running")]
    NotRunning,
}
