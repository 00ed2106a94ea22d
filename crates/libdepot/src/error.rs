use std::io;
use std::net::SocketAddr;

use depot_core::wire::WireError;

/// Errors surfaced by the client driver.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection to daemon server ({0}) failed: {1}")]
    Connect(SocketAddr, #[source] io::Error),

    #[error("connection closed by daemon server")]
    ConnectionClosed,

    /// Request validation or reply decoding failed. For requests this fires
    /// before any network I/O.
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}
