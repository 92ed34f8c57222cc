//! WebSocket transport: upgrade handling, per-client session loop,
//! heartbeat and outbound batch packing.

pub mod batch;
pub mod handler;
pub mod heartbeat;
pub mod session;
