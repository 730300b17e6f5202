//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded, tagged by `type` in snake_case. Change
//! frames are exactly the engine's [`RemoteChange`] wire format.

use gymsync_engine::RemoteChange;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A document was created or replaced.
    Upserted { id: String, data: Value },

    /// A document was deleted.
    Removed { id: String },

    /// Response to ping.
    Pong,

    /// Error message.
    Error { message: String },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

impl From<RemoteChange> for ServerMessage {
    fn from(change: RemoteChange) -> Self {
        match change {
            RemoteChange::Upserted { id, data } => ServerMessage::Upserted { id, data },
            RemoteChange::Removed { id } => ServerMessage::Removed { id },
        }
    }
}
