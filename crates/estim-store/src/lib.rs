//! Shared room state for the estimation server.
//!
//! All state lives in the key/value store, never in per-process memory, so
//! any number of server processes can serve sockets for the same room and
//! observe each other's mutations through the per-room refresh marker.

pub mod kv;
pub mod memory;
pub mod rooms;

pub use kv::{Key, Kv, KvError};
pub use memory::MemoryKv;
pub use rooms::{
    Participant, ParticipantRecord, RoomRecord, RoomStore, RoomWatch, Snapshot, StoreError,
};
