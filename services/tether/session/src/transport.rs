//! WebSocket transport helpers for the client side.

use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::SessionError;

/// A client-side WebSocket connection.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket connection to `url`, e.g. `ws://127.0.0.1:8080/echo`.
pub async fn dial(url: &str) -> Result<WsStream, SessionError> {
    let (stream, response) = connect_async(url).await.map_err(SessionError::Dial)?;
    debug!("WebSocket handshake completed ({})", response.status());
    Ok(stream)
}
