//! Echo server for tether.
//!
//! Accepts WebSocket connections and reflects every data message back to
//! its sender:
//!
//! - One task per accepted connection, each running a sequential echo loop
//! - Handler failures stay local to their connection
//! - Graceful shutdown: stop accepting, drain open connections for a
//!   bounded time, then abort whatever remains
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_server::{EchoServer, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let shutdown = CancellationToken::new();
//!     let server = EchoServer::bind("127.0.0.1:8080".parse().unwrap(), ServerConfig::default()).await?;
//!     server.run(shutdown).await.map_err(std::io::Error::other)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod echo;
pub mod lifecycle;

// Re-export main types for convenience
pub use echo::echo;
pub use lifecycle::{EchoServer, ServerConfig, ServerError};
