//! The daemon client: request serialization and reply dispatch.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

use bytes::{Bytes, BytesMut};

use depot_core::wire::{
    ChunkId, ConfirmOut, ErrorOut, PullSegmentOut, QueryOut, Request, Response, StatusOut,
    WireError, MAX_PACKET_SIZE,
};

use crate::error::ClientError;

/// Typed callbacks for daemon replies. Every method has a default; override
/// the ones you care about. The handler receives the client so it can issue
/// follow-up requests from inside a callback.
pub trait ResponseHandler {
    fn on_confirm(&mut self, _client: &mut DaemonClient, _packet: &ConfirmOut) {}

    fn on_error(&mut self, _client: &mut DaemonClient, _packet: &ErrorOut) {}

    fn on_status(&mut self, _client: &mut DaemonClient, _packet: &StatusOut) {}

    fn on_memory_push_start(&mut self, _client: &mut DaemonClient, _chunk_id: ChunkId) {}

    /// Default: start draining the announced chunk when it has any bytes.
    fn on_memory_pull_start(&mut self, client: &mut DaemonClient, chunk_size: u32) {
        if chunk_size > 0 {
            if let Err(e) = client.send_memory_pull_segment_request() {
                tracing::warn!(error = %e, "pull continuation failed");
            }
        }
    }

    /// Default: keep requesting segments until the snapshot size is reached.
    fn on_memory_pull_segment(&mut self, client: &mut DaemonClient, packet: &PullSegmentOut) {
        if packet.end_offset() < packet.chunk_size {
            if let Err(e) = client.send_memory_pull_segment_request() {
                tracing::warn!(error = %e, "pull continuation failed");
            }
        }
    }

    fn on_memory_query(&mut self, _client: &mut DaemonClient, _packet: &QueryOut) {}

    /// An unrecognized reply id. Default: log and continue.
    fn on_invalid_packet(&mut self, _client: &mut DaemonClient, packet_id: u8) {
        tracing::error!(packet_id, "invalid packet id from daemon server");
    }
}

/// Connection to a Depot daemon.
///
/// The constructor blocks until the TCP handshake settles; afterwards the
/// socket is non-blocking: sends go out immediately and `recv_responses`
/// only dispatches what has already arrived.
pub struct DaemonClient {
    stream: TcpStream,
    send_buf: BytesMut,
    recv_buf: BytesMut,
    shutdown_sent: bool,
}

impl DaemonClient {
    pub fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(|e| ClientError::Connect(addr, e))?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            send_buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
            recv_buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
            shutdown_sent: false,
        })
    }

    /// The local address — the identity the daemon tags owned chunks with.
    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.stream.local_addr()?)
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    pub fn send_status_request(&mut self) -> Result<(), ClientError> {
        self.send_request(&Request::Status)
    }

    pub fn send_memory_push_start_request(&mut self, chunk_size: u32) -> Result<(), ClientError> {
        self.send_request(&Request::MemoryPushStart { chunk_size })
    }

    /// Fails with `WireError::SegmentTooLarge` before any I/O when `data`
    /// exceeds 1024 bytes.
    pub fn send_memory_push_segment_request(
        &mut self,
        chunk_id: ChunkId,
        chunk_size: u32,
        segment_offset: u32,
        data: &[u8],
    ) -> Result<(), ClientError> {
        self.send_request(&Request::MemoryPushSegment {
            chunk_id,
            chunk_size,
            segment_offset,
            data: Bytes::copy_from_slice(data),
        })
    }

    pub fn send_memory_pull_start_request(&mut self, chunk_id: ChunkId) -> Result<(), ClientError> {
        self.send_request(&Request::MemoryPullStart { chunk_id })
    }

    pub fn send_memory_pull_segment_request(&mut self) -> Result<(), ClientError> {
        self.send_request(&Request::MemoryPullSegment)
    }

    /// Fails with `WireError::StringTooLong` before any I/O when `filename`
    /// exceeds 1023 bytes.
    pub fn send_memory_store_request(
        &mut self,
        chunk_id: ChunkId,
        filename: &str,
    ) -> Result<(), ClientError> {
        self.send_request(&Request::MemoryStore {
            chunk_id,
            filename: filename.to_owned(),
        })
    }

    pub fn send_memory_drop_request(&mut self, chunk_id: ChunkId) -> Result<(), ClientError> {
        self.send_request(&Request::MemoryDrop { chunk_id })
    }

    pub fn send_memory_query_request(&mut self) -> Result<(), ClientError> {
        self.send_request(&Request::MemoryQuery)
    }

    /// Announce departure and consume the client. `Drop` does the same
    /// best-effort when this was not called.
    pub fn shutdown(mut self) -> Result<(), ClientError> {
        self.shutdown_sent = true;
        self.send_request(&Request::ClientShutDown)
    }

    // ── Replies ───────────────────────────────────────────────────────────────

    /// Decode every reply that has already arrived and dispatch each to
    /// `handler`, in order. Returns how many replies were dispatched.
    ///
    /// `ConnectionClosed` is reported only after everything readable has been
    /// dispatched.
    pub fn recv_responses(
        &mut self,
        handler: &mut dyn ResponseHandler,
    ) -> Result<usize, ClientError> {
        let closed = self.fill_recv_buf()?;

        let mut dispatched = 0;
        loop {
            match Response::decode(&mut self.recv_buf) {
                Ok(Some(response)) => {
                    dispatched += 1;
                    self.dispatch(response, handler);
                }
                Ok(None) => break,
                Err(WireError::UnknownPacket(id)) => {
                    handler.on_invalid_packet(self, id);
                    self.recv_buf.clear();
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed reply from daemon server, discarding buffer");
                    self.recv_buf.clear();
                    break;
                }
            }
        }

        if closed {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(dispatched)
    }

    /// Read whatever the socket holds. Returns true when the peer closed.
    fn fill_recv_buf(&mut self) -> Result<bool, ClientError> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn dispatch(&mut self, response: Response, handler: &mut dyn ResponseHandler) {
        match response {
            Response::Confirm(packet) => handler.on_confirm(self, &packet),
            Response::Error(packet) => handler.on_error(self, &packet),
            Response::Status(packet) => handler.on_status(self, &packet),
            Response::MemoryPushStart { chunk_id } => handler.on_memory_push_start(self, chunk_id),
            Response::MemoryPullStart { chunk_size } => {
                handler.on_memory_pull_start(self, chunk_size)
            }
            Response::MemoryPullSegment(packet) => handler.on_memory_pull_segment(self, &packet),
            Response::MemoryQuery(packet) => handler.on_memory_query(self, &packet),
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Encode (validating first — a failed encode performs no I/O) and write
    /// the whole packet.
    fn send_request(&mut self, request: &Request) -> Result<(), ClientError> {
        self.send_buf.clear();
        request.encode(&mut self.send_buf)?;

        let mut written = 0;
        while written < self.send_buf.len() {
            match self.stream.write(&self.send_buf[written..]) {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => written += n,
                // Whole packets are small (at most 1280 bytes); spin until
                // the socket buffer drains.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        if !self.shutdown_sent {
            self.shutdown_sent = true;
            let _ = self.send_request(&Request::ClientShutDown);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
