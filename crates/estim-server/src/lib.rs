//! estim-server: room state synchronization for the collaborative
//! estimation tool.
//!
//! Serves the room HTTP surface and the per-room WebSocket protocol. All
//! room and participant state lives in the shared store — this process
//! keeps nothing in memory, so several instances can serve sockets for the
//! same room and observe each other's mutations.

pub mod http;
pub mod presence;
pub mod protocol;
pub mod session;
