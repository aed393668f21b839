//! Room-based WebSocket relay for peer connection signaling

mod actor;
mod directory;
mod messages;
mod registry;
mod router;
mod server;
mod types;

pub use actor::RelayHandle;
pub use directory::{JoinOutcome, LeaveOutcome, RoomDirectory};
pub use messages::{ClientMessage, ServerMessage};
pub use registry::ConnectionRegistry;
pub use router::route;
pub use server::{DEFAULT_RELAY_PORT, RelayServer};
pub use types::{
    ConnectionId, DeliveryResult, MAX_ROOM_ID_LEN, OutboundMessage, RelayError, RoomId,
};
