use serde_json::Value;
use tracing::debug;

use super::messages::ServerMessage;
use super::registry::ConnectionRegistry;
use super::types::{ConnectionId, DeliveryResult, OutboundMessage};

/// Forwards a signaling envelope to its destination transport. The relay
/// assigns `from`; the payload is passed through byte-for-byte, never
/// parsed. No buffering: an unreachable destination means the message is
/// lost permanently, and the sender is not told (fire-and-forget).
pub fn route(
    registry: &ConnectionRegistry,
    from: ConnectionId,
    to: ConnectionId,
    data: Value,
) -> DeliveryResult {
    let Some(tx) = registry.lookup(&to) else {
        debug!("Dropping signal from {} to unknown destination {}", from, to);
        return DeliveryResult::DestinationNotFound;
    };

    let msg = ServerMessage::Signal { from, data };
    let json = serde_json::to_string(&msg).expect("ServerMessage serialization should never fail");
    // Receiver may race a disconnect; that is the same silent drop.
    let _ = tx.send(OutboundMessage::from(json));
    DeliveryResult::Delivered
}
