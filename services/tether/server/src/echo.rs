//! Per-connection echo loop.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Reflect every inbound data message back on the same connection,
/// preserving kind and payload, until the peer closes or the link fails.
///
/// Handling is strictly sequential, so messages are echoed in receipt
/// order. The reply to a close frame stays inside the transport; the loop
/// keeps polling until the stream ends so that reply gets flushed.
pub async fn echo<S>(ws: &mut WebSocketStream<S>) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                debug!("recv: {}", text);
                ws.send(Message::Text(text)).await?;
            }
            Message::Binary(payload) => {
                debug!("recv: {} bytes", payload.len());
                ws.send(Message::Binary(payload)).await?;
            }
            Message::Close(frame) => {
                debug!("peer closing: {:?}", frame);
            }
            _ => {} // ping/pong stay inside the transport
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    /// Build a connected client/server WebSocket pair over in-memory pipes.
    async fn ws_pair() -> (
        WebSocketStream<DuplexStream>,
        WebSocketStream<DuplexStream>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server =
            tokio::spawn(
                async move { tokio_tungstenite::accept_async(server_io).await.unwrap() },
            );
        let (client, _) = tokio_tungstenite::client_async("ws://localhost/echo", client_io)
            .await
            .unwrap();
        (client, server.await.unwrap())
    }

    #[tokio::test]
    async fn test_echo_preserves_kind_payload_and_order() {
        let (mut client, server) = ws_pair().await;
        let handler = tokio::spawn(async move {
            let mut server = server;
            echo(&mut server).await
        });

        let sent = vec![
            Message::Text("Hello world!".into()),
            Message::Binary(vec![0u8, 1, 2, 255].into()),
            Message::Text("".into()),
            Message::Binary(Vec::new().into()),
            Message::Text("2026-08-21 10:15:00.123 +0000".into()),
        ];
        for message in &sent {
            client.send(message.clone()).await.unwrap();
        }
        for message in &sent {
            let echoed = timeout(Duration::from_secs(1), client.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(&echoed, message);
        }

        client.close(None).await.unwrap();
        let result = timeout(Duration::from_secs(1), handler)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_echo_ends_cleanly_on_close() {
        let (mut client, server) = ws_pair().await;
        let handler = tokio::spawn(async move {
            let mut server = server;
            echo(&mut server).await
        });

        client.close(None).await.unwrap();

        // The transport answers the close; the stream then ends without
        // surfacing an error to the handler.
        let result = timeout(Duration::from_secs(1), handler)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_echo_reports_abrupt_disconnect() {
        let (client, server) = ws_pair().await;
        let handler = tokio::spawn(async move {
            let mut server = server;
            echo(&mut server).await
        });

        drop(client);

        let result = timeout(Duration::from_secs(1), handler)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_err());
    }
}
