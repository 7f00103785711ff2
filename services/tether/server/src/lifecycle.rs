//! Listener lifecycle: accept loop, per-connection tasks, bounded drain.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::echo::echo;

/// Server tuning parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long open connections may keep running once shutdown starts.
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Fatal server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Accepting on the listener failed; the server cannot continue.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// The listening side: accepts connections and hands each to an echo task.
pub struct EchoServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl EchoServer {
    /// Bind the listener. A failure here is fatal to startup.
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires, then stop accepting and
    /// drain: in-flight handlers get up to the configured timeout to finish
    /// before being aborted. Handler failures never end the accept loop.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, no longer accepting");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.map_err(ServerError::Accept)?;
                    debug!("accepted connection from {}", peer);
                    handlers.retain(|handler| !handler.is_finished());
                    handlers.push(tokio::spawn(handle_connection(stream, peer)));
                }
            }
        }
        drop(self.listener);
        drain(handlers, self.config.drain_timeout).await;
        Ok(())
    }
}

/// Upgrade one accepted connection and run the echo loop on it. Errors are
/// logged and stay local to this connection.
async fn handle_connection(stream: TcpStream, peer: SocketAddr) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("handshake with {} failed: {}", peer, e);
            return;
        }
    };
    info!("connected: {}", peer);
    match echo(&mut ws).await {
        Ok(()) => info!("disconnected: {}", peer),
        Err(e) => warn!("connection to {} lost: {}", peer, e),
    }
}

/// Wait for handlers to finish, bounded by `timeout`; abort the rest.
async fn drain(handlers: Vec<JoinHandle<()>>, timeout: Duration) {
    if handlers.is_empty() {
        return;
    }
    info!("draining {} open connections", handlers.len());
    let aborts: Vec<_> = handlers.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(timeout, join_all(handlers)).await.is_err() {
        warn!("drain timed out after {:?}, aborting remaining handlers", timeout);
        for handle in aborts {
            handle.abort();
        }
    }
}
