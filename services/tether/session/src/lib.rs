//! Client session management for tether.
//!
//! This crate maintains a long-lived WebSocket link to an echo peer:
//!
//! - One connection per session, driven by two cooperating tasks
//! - Periodic text heartbeats carrying a wall-clock timestamp
//! - Cooperative close handshake with a bounded wait on shutdown
//! - Reconnects with exponential backoff and a consecutive-failure cap,
//!   aborting immediately when the peer was never reachable at all
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_session::{run_with_retry, RetryPolicy, SessionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = CancellationToken::new();
//!     let outcome = run_with_retry(
//!         "ws://127.0.0.1:8080/echo",
//!         SessionConfig::default(),
//!         RetryPolicy::default(),
//!         shutdown,
//!     )
//!     .await;
//!     if let Err(e) = outcome {
//!         eprintln!("link failed: {e}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod heartbeat;
pub mod retry;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use error::{RetryError, SessionError};
pub use retry::{run_with_retry, RetryPolicy};
pub use session::{Session, SessionConfig};
pub use transport::{dial, WsStream};

/// The message type exchanged over a session's connection.
pub use tokio_tungstenite::tungstenite::Message;
