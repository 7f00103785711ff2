//! Tether service binary.
//!
//! This is the main binary for the WebSocket echo service. Depending on the
//! flags it runs the echo server, the self-healing echo client with
//! heartbeats and reconnect backoff, or both in one process.

use clap::Parser;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tether_server::{EchoServer, ServerConfig};
use tether_session::{run_with_retry, RetryPolicy, SessionConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::TetherConfig;
use logging::TetherLogFormatter;

// Component logging macros are defined in logging.rs and available via #[macro_export]

/// WebSocket echo server and self-healing echo client
#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "WebSocket echo server and self-healing echo client"
)]
struct Args {
    /// Listen address for the echo server, e.g. 127.0.0.1:8080
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// WebSocket endpoint to keep a link to, e.g. ws://127.0.0.1:8080/echo
    #[arg(long)]
    connect: Option<String>,

    /// Heartbeat interval on the client link, e.g. 1s
    #[arg(long, default_value = "1s")]
    heartbeat_interval: humantime::Duration,

    /// How long a closing client waits for the peer to finish the handshake
    #[arg(long, default_value = "1s")]
    close_grace: humantime::Duration,

    /// Reconnect backoff after the first consecutive failure
    #[arg(long, default_value = "500ms")]
    backoff_base: humantime::Duration,

    /// Upper bound on the reconnect backoff
    #[arg(long, default_value = "5s")]
    backoff_cap: humantime::Duration,

    /// Consecutive reconnect failures tolerated before giving up
    #[arg(long, default_value = "10")]
    max_failures: u32,

    /// How long the server waits for open connections on shutdown
    #[arg(long, default_value = "5s")]
    drain_timeout: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "tether.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing with the custom console formatter
    let env_filter = EnvFilter::new("info")
        .add_directive(format!("tether={}", args.log_level).parse()?)
        .add_directive(format!("tether_session={}", args.log_level).parse()?)
        .add_directive(format!("tether_server={}", args.log_level).parse()?);

    let formatter = TetherLogFormatter::new("tether".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true) // Enable ANSI colors
        .event_format(formatter)
        .init();

    info!("Starting Tether Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from file; flags win over file values
    let file_config = TetherConfig::load_from_file(&args.config)?;

    let listen = match args.listen {
        Some(addr) => Some(addr),
        None => match file_config.listen.as_deref() {
            Some(s) => Some(s.parse::<SocketAddr>().map_err(|e| {
                anyhow::anyhow!("invalid listen address {:?} in config: {}", s, e)
            })?),
            None => None,
        },
    };
    let endpoint = args.connect.clone().or(file_config.endpoint);

    if listen.is_none() && endpoint.is_none() {
        anyhow::bail!(
            "nothing to do: pass --listen and/or --connect, or set them in {:?}",
            args.config
        );
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    let mut server_task = None;
    if let Some(addr) = listen {
        let server_config = ServerConfig {
            drain_timeout: Duration::from(args.drain_timeout),
        };
        let server = EchoServer::bind(addr, server_config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
        let local_addr = server.local_addr()?;
        component_info!("server", "Listening on {}", local_addr);
        server_task = Some(spawn_role(server.run(shutdown.clone()), shutdown.clone()));
    }

    let mut client_task = None;
    if let Some(endpoint) = endpoint {
        let session_config = SessionConfig {
            heartbeat_interval: Duration::from(args.heartbeat_interval),
            close_grace: Duration::from(args.close_grace),
        };
        let policy = RetryPolicy {
            max_consecutive_failures: args.max_failures,
            base_backoff: Duration::from(args.backoff_base),
            max_backoff: Duration::from(args.backoff_cap),
        };
        component_info!(
            "client",
            "Maintaining link to {} (heartbeat_interval={:?}, backoff={:?}..{:?}, max_failures={})",
            endpoint,
            session_config.heartbeat_interval,
            policy.base_backoff,
            policy.max_backoff,
            policy.max_consecutive_failures
        );
        let token = shutdown.clone();
        client_task = Some(spawn_role(
            async move { run_with_retry(&endpoint, session_config, policy, token).await },
            shutdown.clone(),
        ));
    }

    // A role that fails is fatal to the whole process: its task has already
    // cancelled the shared token, so the other role winds down before the
    // error is reported here.
    let mut client_failure = None;
    if let Some(task) = client_task {
        match task.await? {
            Ok(()) => component_info!("client", "Link closed"),
            Err(e) => {
                component_error!("client", "Link failed: {}", e);
                client_failure = Some(e);
            }
        }
    }

    if let Some(task) = server_task {
        task.await??;
        component_info!("server", "Server stopped");
    }

    if let Some(e) = client_failure {
        return Err(e.into());
    }

    info!("Tether shutdown complete");
    Ok(())
}

/// Spawn a role task. A role that exits with an error cancels `shutdown`,
/// so the other role winds down before the failure is reported.
fn spawn_role<E>(
    role: impl Future<Output = Result<(), E>> + Send + 'static,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), E>>
where
    E: Send + 'static,
{
    tokio::spawn(async move {
        let result = role.await;
        if result.is_err() {
            shutdown.cancel();
        }
        result
    })
}

/// Install signal handlers and cancel `shutdown` on the first signal.
///
/// SIGINT, SIGTERM, SIGHUP and SIGQUIT all funnel into the same token, so
/// repeated or mixed signals after the first are harmless.
fn spawn_signal_listener(shutdown: CancellationToken) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGHUP handler: {}", e))?;
    let mut sigquit = signal(SignalKind::quit())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGQUIT handler: {}", e))?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
            _ = sighup.recv() => "SIGHUP",
            _ = sigquit.recv() => "SIGQUIT",
        };
        component_info!("signal", "Received {}, shutting down", name);
        shutdown.cancel();
    });

    Ok(())
}
