//! Connection adapter: upgrade, per-connection writer, heartbeat and
//! inbound read loop.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
