use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use super::directory::RoomDirectory;
use super::messages::ServerMessage;
use super::registry::ConnectionRegistry;
use super::router;
use super::types::{ConnectionId, DeliveryResult, OutboundMessage, RelayError, RoomId};

/// Commands sent to the relay actor
pub(crate) enum RelayCommand {
    Register {
        tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Join {
        room: RoomId,
        conn: ConnectionId,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    Signal {
        from: ConnectionId,
        to: ConnectionId,
        data: Value,
        reply: oneshot::Sender<DeliveryResult>,
    },
    Leave {
        conn: ConnectionId,
    },
    Unregister {
        conn: ConnectionId,
    },
}

/// Single-owner event loop for all relay state. Registry and directory
/// are only ever touched here, which makes concurrent joins and leaves
/// on the same room linearizable without locks.
pub(crate) async fn relay_actor(mut rx: mpsc::Receiver<RelayCommand>) {
    let mut registry = ConnectionRegistry::new();
    let mut directory = RoomDirectory::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RelayCommand::Register { tx, reply } => {
                let conn = registry.register(tx);
                info!("New connection: {}", conn);
                let _ = reply.send(conn);
            }

            RelayCommand::Join { room, conn, reply } => {
                // At most one room per connection: an earlier membership
                // is dissolved first, with the usual departure notice.
                if let Some(previous) = registry.clear_room(&conn) {
                    if previous != room {
                        leave_room(&mut directory, &registry, &previous, &conn);
                    }
                }

                let outcome = directory.join(room.clone(), conn);
                registry.set_room(&conn, room.clone());

                // Asymmetric notification: prior members learn about the
                // joiner; the joiner is told nothing and waits for each
                // prior member to initiate an offer toward it.
                let notice = ServerMessage::UserJoined { id: conn };
                broadcast(&registry, &outcome.prior, &notice);

                if outcome.created {
                    info!("Room {} created by {}", room, conn);
                }
                info!("Connection {} joined room {}", conn, room);
                let _ = reply.send(outcome.prior);
            }

            RelayCommand::Signal {
                from,
                to,
                data,
                reply,
            } => {
                let result = router::route(&registry, from, to, data);
                let _ = reply.send(result);
            }

            RelayCommand::Leave { conn } => {
                if let Some(room) = registry.clear_room(&conn) {
                    leave_room(&mut directory, &registry, &room, &conn);
                }
            }

            RelayCommand::Unregister { conn } => {
                if let Some(room) = registry.unregister(&conn) {
                    leave_room(&mut directory, &registry, &room, &conn);
                }
                info!("Connection closed: {}", conn);
            }
        }
    }
}

fn leave_room(
    directory: &mut RoomDirectory,
    registry: &ConnectionRegistry,
    room: &RoomId,
    conn: &ConnectionId,
) {
    let outcome = directory.leave(room, conn);

    let notice = ServerMessage::UserLeft { id: *conn };
    broadcast(registry, &outcome.remaining, &notice);

    if outcome.removed_room {
        info!("Room {} removed (empty)", room);
    }
    info!("Connection {} left room {}", conn, room);
}

fn broadcast(registry: &ConnectionRegistry, members: &[ConnectionId], msg: &ServerMessage) {
    if members.is_empty() {
        return;
    }
    let json = serde_json::to_string(msg).expect("ServerMessage serialization should never fail");
    let msg = OutboundMessage::from(json);
    for member in members {
        if let Some(tx) = registry.lookup(member) {
            let _ = tx.send(msg.clone());
        }
    }
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Register a transport and obtain its connection id
    pub async fn register(
        &self,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<ConnectionId, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RelayCommand::Register {
                tx,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))
    }

    /// Join a room, returning the members present before the join
    pub async fn join_room(
        &self,
        room: RoomId,
        conn: ConnectionId,
    ) -> Result<Vec<ConnectionId>, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RelayCommand::Join {
                room,
                conn,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))
    }

    /// Forward a signaling envelope; the result is observable here even
    /// though the wire protocol never reports delivery
    pub async fn signal(
        &self,
        from: ConnectionId,
        to: ConnectionId,
        data: Value,
    ) -> Result<DeliveryResult, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RelayCommand::Signal {
                from,
                to,
                data,
                reply: reply_tx,
            })
            .await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))
    }

    /// Leave the current room, if any
    pub async fn leave_room(&self, conn: ConnectionId) {
        let _ = self.tx.send(RelayCommand::Leave { conn }).await;
    }

    /// Tear down the connection and its room membership
    pub async fn unregister(&self, conn: ConnectionId) {
        let _ = self.tx.send(RelayCommand::Unregister { conn }).await;
    }
}
