use std::collections::HashMap;

use tokio::sync::mpsc;

use super::types::{ConnectionId, OutboundMessage, RoomId};

/// One live transport session: the outbound channel plus the room the
/// connection currently belongs to, if any.
#[derive(Debug)]
struct ConnectionEntry {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    room: Option<RoomId>,
}

/// Maps connection ids to live transport handles and room membership.
/// Owned exclusively by the relay actor task.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh unique id for the transport and records it.
    /// Never fails; ids are regenerated on the off chance of a collision
    /// with a still-live connection.
    pub fn register(&mut self, tx: mpsc::UnboundedSender<OutboundMessage>) -> ConnectionId {
        let mut id = ConnectionId::generate();
        while self.connections.contains_key(&id) {
            id = ConnectionId::generate();
        }
        self.connections.insert(id, ConnectionEntry { tx, room: None });
        id
    }

    /// Resolves a destination transport. None if the id is unknown or
    /// the connection has since disconnected.
    pub fn lookup(&self, id: &ConnectionId) -> Option<&mpsc::UnboundedSender<OutboundMessage>> {
        self.connections.get(id).map(|entry| &entry.tx)
    }

    pub fn room_of(&self, id: &ConnectionId) -> Option<&RoomId> {
        self.connections.get(id).and_then(|entry| entry.room.as_ref())
    }

    /// Records room membership for a connection (at most one room).
    /// Returns the previous room, if the connection was already in one.
    pub fn set_room(&mut self, id: &ConnectionId, room: RoomId) -> Option<RoomId> {
        self.connections
            .get_mut(id)
            .and_then(|entry| entry.room.replace(room))
    }

    /// Clears room membership; returns the room the connection was in.
    pub fn clear_room(&mut self, id: &ConnectionId) -> Option<RoomId> {
        self.connections.get_mut(id).and_then(|entry| entry.room.take())
    }

    /// Removes the connection. Idempotent: unregistering an unknown id
    /// is a no-op. Returns the room the connection belonged to so the
    /// caller can run directory cleanup.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<RoomId> {
        self.connections.remove(id).and_then(|entry| entry.room)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
