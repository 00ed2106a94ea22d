//! depot-core — wire format shared by the daemon, the client driver, and the
//! control tool. All other Depot crates depend on this one.

pub mod wire;

pub use wire::{ChunkId, PacketId, Request, Response, WireError};
