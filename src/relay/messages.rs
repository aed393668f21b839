use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ConnectionId, RoomId};

/// Messages sent from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a room by id, creating it if it does not exist yet
    #[serde(rename = "join-room")]
    JoinRoom { room: RoomId },

    /// Forward an opaque negotiation payload to another connection
    #[serde(rename = "signal")]
    Signal { to: ConnectionId, data: Value },

    /// Leave the current room without disconnecting
    #[serde(rename = "leave-room")]
    LeaveRoom,
}

/// Messages sent from server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// A new peer joined your room; initiate negotiation toward it.
    /// Sent to prior members only, never to the joiner itself.
    #[serde(rename = "user-joined")]
    UserJoined { id: ConnectionId },

    /// A peer left your room (or disconnected); drop its negotiation state
    #[serde(rename = "user-left")]
    UserLeft { id: ConnectionId },

    /// A forwarded negotiation payload; `from` is assigned by the relay,
    /// never by the sender
    #[serde(rename = "signal")]
    Signal { from: ConnectionId, data: Value },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}
