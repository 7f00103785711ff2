//! Error types for client sessions and the reconnect loop.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced while dialing or running a single session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The dial failed; no session activities were started.
    #[error("dial failed: {0}")]
    Dial(#[source] tungstenite::Error),

    /// A receive on the open connection failed.
    #[error("receive failed: {0}")]
    Receive(#[source] tungstenite::Error),

    /// A send on the open connection failed.
    #[error("send failed: {0}")]
    Send(#[source] tungstenite::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

/// Terminal outcomes of the reconnect loop.
#[derive(Error, Debug)]
pub enum RetryError {
    /// The very first attempt failed before anything was ever received;
    /// the peer is treated as unreachable and no retries are made.
    #[error("never connected: {0}")]
    NeverConnected(#[source] SessionError),

    /// Too many consecutive failures since the last successful receive.
    #[error("gave up after {failures} consecutive failures: {last}")]
    Exhausted {
        /// Consecutive failures recorded when the loop gave up.
        failures: u32,
        /// The error from the final attempt.
        #[source]
        last: SessionError,
    },
}
