//! One client session: a single WebSocket connection driven to termination.
//!
//! A session runs two cooperating activities. A spawned receive task reads
//! inbound messages, fires the success callback on the first data message,
//! and reports the terminal event over a one-shot channel. The control loop
//! sends a text heartbeat on every timer tick and, when shutdown is
//! requested, performs the close handshake: send a normal-closure frame,
//! then wait for the peer's close (or a bounded grace period) before
//! returning.

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::heartbeat::heartbeat_message;
use crate::transport::dial;

/// Session tuning parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between outbound heartbeats.
    pub heartbeat_interval: Duration,
    /// How long the close handshake waits for the peer's close.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            close_grace: Duration::from_secs(1),
        }
    }
}

/// Client-side owner of one WebSocket connection.
pub struct Session {
    config: SessionConfig,
}

impl Session {
    /// Create a session with the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Dial `url` and drive the connection until it terminates.
    ///
    /// `on_receive` is invoked at most once, on the first inbound data
    /// message. Returns `Ok(())` when the session ended because `shutdown`
    /// fired; any connection failure is returned as the session's error.
    /// By the time this returns, the receive task has stopped.
    pub async fn run<F>(
        &self,
        url: &str,
        shutdown: CancellationToken,
        on_receive: F,
    ) -> Result<(), SessionError>
    where
        F: FnOnce() + Send + 'static,
    {
        info!("connecting to {}", url);
        let stream = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("shutdown while dialing {}", url);
                return Ok(());
            }
            dialed = dial(url) => dialed?,
        };
        info!("connected to {}", url);
        self.drive(stream, shutdown, on_receive).await
    }

    /// Drive an already-established connection until it terminates, with
    /// the same contract as [`run`](Self::run).
    pub async fn drive<S, F>(
        &self,
        stream: WebSocketStream<S>,
        shutdown: CancellationToken,
        on_receive: F,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let (mut sink, source) = stream.split();
        let (event_tx, mut event_rx) = oneshot::channel();
        let receiver = tokio::spawn(receive_loop(source, event_tx, on_receive));

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // the interval's first tick completes immediately

        let result = loop {
            tokio::select! {
                biased;

                event = &mut event_rx => {
                    break Err(event.unwrap_or(SessionError::Closed));
                }
                _ = shutdown.cancelled() => {
                    break self.close_handshake(&mut sink, &mut event_rx).await;
                }
                // Sending inside the raced arm keeps a back-pressured send
                // preemptible by shutdown and by the terminal event.
                sent = async { ticker.tick().await; sink.send(heartbeat_message()).await } => {
                    match sent {
                        Ok(()) => debug!("heartbeat sent"),
                        Err(e) => {
                            warn!("heartbeat send failed: {}", e);
                            break Err(SessionError::Send(e));
                        }
                    }
                }
            }
        };

        receiver.abort();
        let _ = receiver.await;
        result
    }

    /// Send a normal-closure frame, then wait for the receive task to see
    /// the peer's close. Both the send and the wait are bounded by the
    /// configured grace period.
    async fn close_handshake<S>(
        &self,
        sink: &mut SplitSink<WebSocketStream<S>, Message>,
        event_rx: &mut oneshot::Receiver<SessionError>,
    ) -> Result<(), SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!("shutdown requested, closing session");
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        match tokio::time::timeout(self.config.close_grace, sink.send(close)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("close send failed: {}", e);
                return Err(SessionError::Send(e));
            }
            Err(_) => {
                warn!(
                    "close send stalled for {:?}, abandoning the handshake",
                    self.config.close_grace
                );
                return Ok(());
            }
        }
        tokio::select! {
            _ = event_rx => debug!("peer acknowledged close"),
            _ = tokio::time::sleep(self.config.close_grace) => {
                debug!("no close from peer within {:?}", self.config.close_grace);
            }
        }
        Ok(())
    }
}

/// Receive task body: loop on inbound messages until a terminal event,
/// then publish that event exactly once.
async fn receive_loop<S, F>(
    mut source: SplitStream<WebSocketStream<S>>,
    event_tx: oneshot::Sender<SessionError>,
    on_receive: F,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce() + Send + 'static,
{
    let mut on_receive = Some(on_receive);
    let terminal = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("recv: {}", text);
                if let Some(notify) = on_receive.take() {
                    notify();
                }
            }
            Some(Ok(Message::Binary(payload))) => {
                debug!("recv: {} bytes", payload.len());
                if let Some(notify) = on_receive.take() {
                    notify();
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("peer sent close: {:?}", frame);
                break SessionError::Closed;
            }
            Some(Ok(_)) => {} // ping/pong stay inside the transport
            Some(Err(e)) => break SessionError::Receive(e),
            None => break SessionError::Closed,
        }
    };
    let _ = event_tx.send(terminal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Instant};

    async fn accept_ws(listener: TcpListener) -> tokio_tungstenite::WebSocketStream<tokio::net::TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_dial_failure_surfaces() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let session = Session::new(SessionConfig::default());
        let result = session
            .run(&format!("ws://{}", addr), CancellationToken::new(), || {})
            .await;
        assert!(matches!(result, Err(SessionError::Dial(_))));
    }

    #[tokio::test]
    async fn test_heartbeats_echo_and_clean_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (first_tx, first_rx) = oneshot::channel();

        // Echo peer: return every text message, acknowledge the close.
        let peer = tokio::spawn(async move {
            let mut ws = accept_ws(listener).await;
            let mut first = Some(first_tx);
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(tx) = first.take() {
                            let _ = tx.send(text.to_string());
                        }
                        ws.send(Message::Text(text)).await.unwrap();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        assert!(
                            matches!(frame, Some(ref f) if f.code == CloseCode::Normal),
                            "expected a normal-closure frame, got {:?}",
                            frame
                        );
                        let _ = ws.close(frame).await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        });

        let shutdown = CancellationToken::new();
        let received = Arc::new(AtomicBool::new(false));
        let flag = received.clone();
        let config = SessionConfig {
            heartbeat_interval: Duration::from_millis(20),
            close_grace: Duration::from_secs(1),
        };
        let url = format!("ws://{}", addr);
        let runner = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                Session::new(config)
                    .run(&url, shutdown, move || flag.store(true, Ordering::SeqCst))
                    .await
            }
        });

        // The first heartbeat carries a non-empty timestamp payload.
        let first = timeout(Duration::from_secs(2), first_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!first.is_empty());

        // Let a few heartbeats cycle, then request shutdown.
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();

        let result = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(result.is_ok(), "unexpected session error: {:?}", result);
        assert!(received.load(Ordering::SeqCst));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_heartbeats_after_the_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Peer that records everything arriving after the close frame.
        let peer = tokio::spawn(async move {
            let mut ws = accept_ws(listener).await;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    other => panic!("connection ended before close: {:?}", other),
                }
            }
            // Keep reading across several heartbeat intervals; only the
            // end of the stream may follow the close.
            let mut after_close = Vec::new();
            loop {
                match timeout(Duration::from_millis(120), ws.next()).await {
                    Ok(Some(Ok(message))) => after_close.push(message),
                    Ok(Some(Err(_))) | Ok(None) => break,
                    Err(_) => break,
                }
            }
            after_close
        });

        let shutdown = CancellationToken::new();
        let config = SessionConfig {
            heartbeat_interval: Duration::from_millis(20),
            close_grace: Duration::from_millis(200),
        };
        let url = format!("ws://{}", addr);
        let runner = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { Session::new(config).run(&url, shutdown, || {}).await }
        });

        // Let a few heartbeats cycle, then request shutdown.
        tokio::time::sleep(Duration::from_millis(70)).await;
        shutdown.cancel();

        let result = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(result.is_ok(), "unexpected session error: {:?}", result);
        let after_close = timeout(Duration::from_secs(2), peer).await.unwrap().unwrap();
        assert!(after_close.is_empty(), "frames after close: {:?}", after_close);
    }

    #[tokio::test]
    async fn test_close_handshake_bounded_without_peer_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Peer that completes the handshake but never reads afterwards, so
        // the close goes unanswered.
        let peer = tokio::spawn(async move {
            let _ws = accept_ws(listener).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let shutdown = CancellationToken::new();
        let config = SessionConfig {
            heartbeat_interval: Duration::from_secs(30),
            close_grace: Duration::from_millis(100),
        };
        let url = format!("ws://{}", addr);
        let runner = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { Session::new(config).run(&url, shutdown, || {}).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let asked = Instant::now();
        shutdown.cancel();

        let result = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(
            asked.elapsed() < Duration::from_millis(900),
            "close handshake was not bounded by the grace period"
        );
        peer.abort();
    }

    #[tokio::test]
    async fn test_shutdown_preempts_a_backpressured_send() {
        // A pipe too small for the heartbeat traffic, with a peer that
        // completes the handshake and then never reads again, so sends
        // back up and stall.
        let (client_io, server_io) = tokio::io::duplex(64);
        let peer = tokio::spawn(async move {
            let _ws = tokio_tungstenite::accept_async(server_io).await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let (stream, _) = tokio_tungstenite::client_async("ws://localhost/echo", client_io)
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let config = SessionConfig {
            heartbeat_interval: Duration::from_millis(10),
            close_grace: Duration::from_millis(100),
        };
        let runner = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { Session::new(config).drive(stream, shutdown, || {}).await }
        });

        // Let heartbeats fill the pipe, then ask for shutdown.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let asked = Instant::now();
        shutdown.cancel();

        let result = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(result.is_ok(), "unexpected session error: {:?}", result);
        assert!(
            asked.elapsed() < Duration::from_millis(900),
            "shutdown blocked behind a stalled send"
        );
        peer.abort();
    }

    #[tokio::test]
    async fn test_peer_drop_reported_as_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept the handshake, then hang up without a close frame.
        let peer = tokio::spawn(async move {
            let ws = accept_ws(listener).await;
            drop(ws);
        });

        let session = Session::new(SessionConfig {
            heartbeat_interval: Duration::from_millis(10),
            close_grace: Duration::from_millis(100),
        });
        let result = timeout(
            Duration::from_secs(2),
            session.run(&format!("ws://{}", addr), CancellationToken::new(), || {}),
        )
        .await
        .unwrap();
        assert!(result.is_err());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_before_dial_returns_clean() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let session = Session::new(SessionConfig::default());
        // The address is never dialed once cancellation has fired.
        let result = session.run("ws://127.0.0.1:1", shutdown, || {}).await;
        assert!(result.is_ok());
    }
}
