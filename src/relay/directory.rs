use std::collections::HashMap;

use super::types::{ConnectionId, RoomId};

/// Result of a join: the members present before this join (the peers the
/// joiner will negotiate with) and whether the room was created by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub prior: Vec<ConnectionId>,
    pub created: bool,
}

/// Result of a leave: the members still in the room (recipients of the
/// departure notification) and whether the room was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub remaining: Vec<ConnectionId>,
    pub removed_room: bool,
}

/// Maps room ids to member sets. Rooms exist exactly while they have
/// members: created on first join, discarded on last leave. Owned
/// exclusively by the relay actor task, which makes join/leave on the
/// same room linearizable.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Vec<ConnectionId>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection to the room, creating the room if absent.
    /// `prior` is the member snapshot from before this join. Joining a
    /// room the connection is already in does not duplicate the entry.
    pub fn join(&mut self, room: RoomId, conn: ConnectionId) -> JoinOutcome {
        let created = !self.rooms.contains_key(&room);
        let members = self.rooms.entry(room).or_default();

        let prior: Vec<ConnectionId> = members.iter().filter(|m| **m != conn).copied().collect();
        if !members.contains(&conn) {
            members.push(conn);
        }

        JoinOutcome { prior, created }
    }

    /// Removes the connection from the room; discards the room when it
    /// becomes empty. No-op if the connection is not a member.
    pub fn leave(&mut self, room: &RoomId, conn: &ConnectionId) -> LeaveOutcome {
        let Some(members) = self.rooms.get_mut(room) else {
            return LeaveOutcome {
                remaining: Vec::new(),
                removed_room: false,
            };
        };

        members.retain(|m| m != conn);

        if members.is_empty() {
            self.rooms.remove(room);
            LeaveOutcome {
                remaining: Vec::new(),
                removed_room: true,
            }
        } else {
            LeaveOutcome {
                remaining: members.clone(),
                removed_room: false,
            }
        }
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
