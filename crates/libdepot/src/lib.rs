//! libdepot — client driver for the Depot daemon protocol.
//!
//! The driver is deliberately runtime-free: it uses a plain non-blocking TCP
//! socket, so it embeds in synchronous tools and async programs alike.

pub mod client;
pub mod error;

pub use client::{DaemonClient, ResponseHandler};
pub use error::ClientError;
