//! Heartbeat construction for client sessions.

use chrono::Local;
use tokio_tungstenite::tungstenite::Message;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %z";

/// Render the wall-clock timestamp carried as a heartbeat payload.
pub fn heartbeat_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Build one heartbeat: a text message holding the current timestamp.
pub fn heartbeat_message() -> Message {
    Message::Text(heartbeat_timestamp().into())
}
