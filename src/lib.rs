//! meshrelay: a room-based signaling relay for establishing mesh
//! peer-to-peer media connections, plus the per-pair negotiation state
//! machines clients run against it.

pub mod negotiation;
pub mod relay;
