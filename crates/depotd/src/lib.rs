//! depotd — the Depot daemon: a remote, chunk-addressable memory store
//! served over a small binary TCP protocol.
//!
//! The binary entry point lives in `main.rs`; everything else is a library
//! so the integration tests can run the daemon in-process.

pub mod config;
pub mod log;
pub mod server;
pub mod session;
pub mod store;

pub use config::DaemonConfig;
pub use server::{DaemonContext, DaemonServer};
