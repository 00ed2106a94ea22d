//! Depot wire format — on-wire packet types for all daemon communication.
//!
//! These types ARE the protocol. Every packet is a 1-byte id followed by its
//! fields in declaration order; there is no length prefix — the id alone
//! determines the layout, and variable parts carry their own length
//! (`segment_size`, `num_chunks`) or end at a NUL terminator (strings).
//!
//! Integers travel in NATIVE byte order. The protocol assumes homogeneous
//! endianness between client and server; this is a documented limitation of
//! the wire format, not something the codec papers over.
//!
//! Decoding is an explicit per-field, tagged-variant read from a byte
//! buffer. There is no unsafe code in this module.

use bytes::{Buf, BufMut, Bytes, BytesMut};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default daemon TCP port.
pub const DEFAULT_PORT: u16 = 22914;

/// Daemon protocol version string, reported at startup and in status output.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Maximum whole-packet size in bytes. No encoded packet may exceed this.
pub const MAX_PACKET_SIZE: usize = 1280;

/// Maximum embedded variable payload (segment data or string) per packet.
pub const MAX_SUB_BUFFER: usize = 1024;

/// Maximum chunk ids carried by one `MemoryQueryOut` page.
pub const MAX_QUERY_IDS: usize = 255;

/// Memory chunk identity. Assigned by the server from a monotonic factory.
pub type ChunkId = u32;

/// Reserved id. Never denotes a real chunk; a drop request carrying it asks
/// the server to purge every chunk the requesting client owns.
pub const CHUNK_ID_ALL: ChunkId = 0;

// ── Packet ids ────────────────────────────────────────────────────────────────

/// Leading discriminant of every packet.
/// `*In` = client→server, `*Out` = server→client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketId {
    ClientShutDownIn = 1,
    ConfirmOut = 2,
    ErrorOut = 3,
    StatusIn = 4,
    StatusOut = 5,
    MemoryPushStartIn = 6,
    MemoryPushStartOut = 7,
    MemoryPushSegmentIn = 8,
    MemoryPullStartIn = 9,
    MemoryPullStartOut = 10,
    MemoryPullSegmentIn = 11,
    MemoryPullSegmentOut = 12,
    MemoryStoreIn = 13,
    MemoryDropIn = 14,
    MemoryQueryIn = 15,
    MemoryQueryOut = 16,
}

impl TryFrom<u8> for PacketId {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => PacketId::ClientShutDownIn,
            2 => PacketId::ConfirmOut,
            3 => PacketId::ErrorOut,
            4 => PacketId::StatusIn,
            5 => PacketId::StatusOut,
            6 => PacketId::MemoryPushStartIn,
            7 => PacketId::MemoryPushStartOut,
            8 => PacketId::MemoryPushSegmentIn,
            9 => PacketId::MemoryPullStartIn,
            10 => PacketId::MemoryPullStartOut,
            11 => PacketId::MemoryPullSegmentIn,
            12 => PacketId::MemoryPullSegmentOut,
            13 => PacketId::MemoryStoreIn,
            14 => PacketId::MemoryDropIn,
            15 => PacketId::MemoryQueryIn,
            16 => PacketId::MemoryQueryOut,
            other => return Err(WireError::UnknownPacket(other)),
        })
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or decoding wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet id ( {0} )")]
    UnknownPacket(u8),

    #[error("segment size {0} exceeds maximum {}", MAX_SUB_BUFFER)]
    SegmentTooLarge(usize),

    #[error("string length {0} exceeds maximum {}", MAX_SUB_BUFFER - 1)]
    StringTooLong(usize),

    #[error("string field is not valid UTF-8 or contains NUL")]
    InvalidString,

    #[error("query page holds {0} ids, maximum {}", MAX_QUERY_IDS)]
    TooManyIds(usize),
}

// ── Reply payloads ────────────────────────────────────────────────────────────

/// Status report for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusOut {
    /// Number of clients the server currently has registered.
    pub num_clients: u8,
    /// Number of memory chunks the server holds for the requesting client.
    pub num_chunks: u32,
    /// Human-readable server configuration text, at most 1023 bytes.
    pub info: String,
}

/// One segment of an in-flight chunk download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSegmentOut {
    pub chunk_id: ChunkId,
    /// Size snapshot taken when the pull started.
    pub chunk_size: u32,
    /// Offset of `data` within the chunk.
    pub segment_offset: u32,
    /// At most 1024 bytes.
    pub data: Bytes,
}

impl PullSegmentOut {
    /// Offset of the first byte NOT covered by this segment.
    pub fn end_offset(&self) -> u32 {
        self.segment_offset + self.data.len() as u32
    }
}

/// One page of a chunk-id enumeration, at most 255 ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOut {
    pub chunk_ids: Vec<ChunkId>,
}

/// Acknowledgement of a request, by packet id. Defined by the protocol but
/// never emitted by the daemon — requests are fire-and-forget by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOut {
    pub confirm_id: u8,
}

/// Error report. Defined by the protocol but never emitted by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorOut {
    pub code: u8,
    pub message: String,
}

// ── Requests (client → server) ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// The client is going away; the server unregisters it. No reply.
    ClientShutDown,
    /// Ask for a `StatusOut`.
    Status,
    /// Allocate a chunk of `chunk_size` bytes. Replied with `MemoryPushStart`.
    MemoryPushStart { chunk_size: u32 },
    /// Write `data` into an owned chunk at `segment_offset`. No reply.
    MemoryPushSegment {
        chunk_id: ChunkId,
        chunk_size: u32,
        segment_offset: u32,
        data: Bytes,
    },
    /// Begin downloading a chunk. Replied with `MemoryPullStart`.
    MemoryPullStart { chunk_id: ChunkId },
    /// Request the next queued pull segment. Replied with `MemoryPullSegment`,
    /// or silently ignored when the pull queue is empty.
    MemoryPullSegment,
    /// Write an owned chunk verbatim to a server-side file. No reply.
    MemoryStore { chunk_id: ChunkId, filename: String },
    /// Drop an owned chunk, or every owned chunk when `chunk_id` is
    /// `CHUNK_ID_ALL`. No reply.
    MemoryDrop { chunk_id: ChunkId },
    /// Enumerate owned chunk ids. Replied with one or more `MemoryQuery` pages.
    MemoryQuery,
}

impl Request {
    pub fn id(&self) -> PacketId {
        match self {
            Request::ClientShutDown => PacketId::ClientShutDownIn,
            Request::Status => PacketId::StatusIn,
            Request::MemoryPushStart { .. } => PacketId::MemoryPushStartIn,
            Request::MemoryPushSegment { .. } => PacketId::MemoryPushSegmentIn,
            Request::MemoryPullStart { .. } => PacketId::MemoryPullStartIn,
            Request::MemoryPullSegment => PacketId::MemoryPullSegmentIn,
            Request::MemoryStore { .. } => PacketId::MemoryStoreIn,
            Request::MemoryDrop { .. } => PacketId::MemoryDropIn,
            Request::MemoryQuery => PacketId::MemoryQueryIn,
        }
    }

    /// Encode into `buf`. Size bounds are checked before anything is written,
    /// so a failed encode leaves `buf` untouched.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let id = self.id() as u8;
        match self {
            Request::ClientShutDown
            | Request::Status
            | Request::MemoryPullSegment
            | Request::MemoryQuery => buf.put_u8(id),

            Request::MemoryPushStart { chunk_size } => {
                buf.put_u8(id);
                buf.put_u32_ne(*chunk_size);
            }

            Request::MemoryPushSegment {
                chunk_id,
                chunk_size,
                segment_offset,
                data,
            } => {
                if data.len() > MAX_SUB_BUFFER {
                    return Err(WireError::SegmentTooLarge(data.len()));
                }
                buf.put_u8(id);
                buf.put_u32_ne(*chunk_id);
                buf.put_u32_ne(*chunk_size);
                buf.put_u32_ne(*segment_offset);
                buf.put_u16_ne(data.len() as u16);
                buf.put_slice(data);
            }

            Request::MemoryPullStart { chunk_id } | Request::MemoryDrop { chunk_id } => {
                buf.put_u8(id);
                buf.put_u32_ne(*chunk_id);
            }

            Request::MemoryStore { chunk_id, filename } => {
                check_string(filename)?;
                buf.put_u8(id);
                buf.put_u32_ne(*chunk_id);
                put_string(buf, filename);
            }
        }
        Ok(())
    }

    /// Try to decode one request from the front of `buf`.
    ///
    /// Consumes the packet's bytes on success. Returns `Ok(None)` and leaves
    /// the buffer untouched when more bytes are needed. A `WireError` means
    /// the stream cannot be resynchronized; the caller discards the buffer.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Request>, WireError> {
        let Some(&raw) = buf.first() else {
            return Ok(None);
        };
        match PacketId::try_from(raw)? {
            PacketId::ClientShutDownIn => {
                buf.advance(1);
                Ok(Some(Request::ClientShutDown))
            }
            PacketId::StatusIn => {
                buf.advance(1);
                Ok(Some(Request::Status))
            }
            PacketId::MemoryPullSegmentIn => {
                buf.advance(1);
                Ok(Some(Request::MemoryPullSegment))
            }
            PacketId::MemoryQueryIn => {
                buf.advance(1);
                Ok(Some(Request::MemoryQuery))
            }
            PacketId::MemoryPushStartIn => Ok(decode_u32_arg(buf)
                .map(|chunk_size| Request::MemoryPushStart { chunk_size })),
            PacketId::MemoryPullStartIn => {
                Ok(decode_u32_arg(buf).map(|chunk_id| Request::MemoryPullStart { chunk_id }))
            }
            PacketId::MemoryDropIn => {
                Ok(decode_u32_arg(buf).map(|chunk_id| Request::MemoryDrop { chunk_id }))
            }
            PacketId::MemoryPushSegmentIn => {
                Ok(decode_segment(buf)?.map(|(chunk_id, chunk_size, segment_offset, data)| {
                    Request::MemoryPushSegment {
                        chunk_id,
                        chunk_size,
                        segment_offset,
                        data,
                    }
                }))
            }
            PacketId::MemoryStoreIn => {
                // id + chunk_id, then a NUL-terminated filename
                if buf.len() < 5 {
                    return Ok(None);
                }
                let Some(nul) = find_nul(buf, 5)? else {
                    return Ok(None);
                };
                let chunk_id = u32_at(buf, 1);
                let filename = string_from(&buf[5..nul])?;
                buf.advance(nul + 1);
                Ok(Some(Request::MemoryStore { chunk_id, filename }))
            }
            // A reply id arriving at the server is a protocol violation.
            other => Err(WireError::UnknownPacket(other as u8)),
        }
    }
}

// ── Responses (server → client) ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Confirm(ConfirmOut),
    Error(ErrorOut),
    Status(StatusOut),
    MemoryPushStart { chunk_id: ChunkId },
    MemoryPullStart { chunk_size: u32 },
    MemoryPullSegment(PullSegmentOut),
    MemoryQuery(QueryOut),
}

impl Response {
    pub fn id(&self) -> PacketId {
        match self {
            Response::Confirm(_) => PacketId::ConfirmOut,
            Response::Error(_) => PacketId::ErrorOut,
            Response::Status(_) => PacketId::StatusOut,
            Response::MemoryPushStart { .. } => PacketId::MemoryPushStartOut,
            Response::MemoryPullStart { .. } => PacketId::MemoryPullStartOut,
            Response::MemoryPullSegment(_) => PacketId::MemoryPullSegmentOut,
            Response::MemoryQuery(_) => PacketId::MemoryQueryOut,
        }
    }

    /// Encode into `buf`. Size bounds are checked before anything is written.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let id = self.id() as u8;
        match self {
            Response::Confirm(c) => {
                buf.put_u8(id);
                buf.put_u8(c.confirm_id);
            }
            Response::Error(e) => {
                check_string(&e.message)?;
                buf.put_u8(id);
                buf.put_u8(e.code);
                put_string(buf, &e.message);
            }
            Response::Status(s) => {
                check_string(&s.info)?;
                buf.put_u8(id);
                buf.put_u8(s.num_clients);
                buf.put_u32_ne(s.num_chunks);
                put_string(buf, &s.info);
            }
            Response::MemoryPushStart { chunk_id } => {
                buf.put_u8(id);
                buf.put_u32_ne(*chunk_id);
            }
            Response::MemoryPullStart { chunk_size } => {
                buf.put_u8(id);
                buf.put_u32_ne(*chunk_size);
            }
            Response::MemoryPullSegment(seg) => {
                if seg.data.len() > MAX_SUB_BUFFER {
                    return Err(WireError::SegmentTooLarge(seg.data.len()));
                }
                buf.put_u8(id);
                buf.put_u32_ne(seg.chunk_id);
                buf.put_u32_ne(seg.chunk_size);
                buf.put_u32_ne(seg.segment_offset);
                buf.put_u16_ne(seg.data.len() as u16);
                buf.put_slice(&seg.data);
            }
            Response::MemoryQuery(q) => {
                if q.chunk_ids.len() > MAX_QUERY_IDS {
                    return Err(WireError::TooManyIds(q.chunk_ids.len()));
                }
                buf.put_u8(id);
                buf.put_u8(q.chunk_ids.len() as u8);
                for chunk_id in &q.chunk_ids {
                    buf.put_u32_ne(*chunk_id);
                }
            }
        }
        Ok(())
    }

    /// Try to decode one response from the front of `buf`.
    /// Same contract as [`Request::decode`].
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Response>, WireError> {
        let Some(&raw) = buf.first() else {
            return Ok(None);
        };
        match PacketId::try_from(raw)? {
            PacketId::ConfirmOut => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let confirm_id = buf[1];
                buf.advance(2);
                Ok(Some(Response::Confirm(ConfirmOut { confirm_id })))
            }
            PacketId::ErrorOut => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let Some(nul) = find_nul(buf, 2)? else {
                    return Ok(None);
                };
                let code = buf[1];
                let message = string_from(&buf[2..nul])?;
                buf.advance(nul + 1);
                Ok(Some(Response::Error(ErrorOut { code, message })))
            }
            PacketId::StatusOut => {
                if buf.len() < 6 {
                    return Ok(None);
                }
                let Some(nul) = find_nul(buf, 6)? else {
                    return Ok(None);
                };
                let num_clients = buf[1];
                let num_chunks = u32_at(buf, 2);
                let info = string_from(&buf[6..nul])?;
                buf.advance(nul + 1);
                Ok(Some(Response::Status(StatusOut {
                    num_clients,
                    num_chunks,
                    info,
                })))
            }
            PacketId::MemoryPushStartOut => {
                Ok(decode_u32_arg(buf).map(|chunk_id| Response::MemoryPushStart { chunk_id }))
            }
            PacketId::MemoryPullStartOut => {
                Ok(decode_u32_arg(buf).map(|chunk_size| Response::MemoryPullStart { chunk_size }))
            }
            PacketId::MemoryPullSegmentOut => {
                Ok(decode_segment(buf)?.map(|(chunk_id, chunk_size, segment_offset, data)| {
                    Response::MemoryPullSegment(PullSegmentOut {
                        chunk_id,
                        chunk_size,
                        segment_offset,
                        data,
                    })
                }))
            }
            PacketId::MemoryQueryOut => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let num = buf[1] as usize;
                if buf.len() < 2 + num * 4 {
                    return Ok(None);
                }
                buf.advance(2);
                let mut chunk_ids = Vec::with_capacity(num);
                for _ in 0..num {
                    chunk_ids.push(buf.get_u32_ne());
                }
                Ok(Some(Response::MemoryQuery(QueryOut { chunk_ids })))
            }
            // A request id arriving at the client is a protocol violation.
            other => Err(WireError::UnknownPacket(other as u8)),
        }
    }
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes(buf[at..at + 4].try_into().unwrap())
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes(buf[at..at + 2].try_into().unwrap())
}

/// Decode an id + single-u32 packet. Returns None when incomplete.
fn decode_u32_arg(buf: &mut BytesMut) -> Option<u32> {
    if buf.len() < 5 {
        return None;
    }
    let value = u32_at(buf, 1);
    buf.advance(5);
    Some(value)
}

/// Decode the shared push/pull segment layout:
/// id, chunk_id, chunk_size, segment_offset, segment_size, data.
#[allow(clippy::type_complexity)]
fn decode_segment(buf: &mut BytesMut) -> Result<Option<(u32, u32, u32, Bytes)>, WireError> {
    const HEADER: usize = 15;
    if buf.len() < HEADER {
        return Ok(None);
    }
    let segment_size = u16_at(buf, 13) as usize;
    if segment_size > MAX_SUB_BUFFER {
        return Err(WireError::SegmentTooLarge(segment_size));
    }
    if buf.len() < HEADER + segment_size {
        return Ok(None);
    }
    let chunk_id = u32_at(buf, 1);
    let chunk_size = u32_at(buf, 5);
    let segment_offset = u32_at(buf, 9);
    buf.advance(HEADER);
    let data = buf.split_to(segment_size).freeze();
    Ok(Some((chunk_id, chunk_size, segment_offset, data)))
}

/// Locate the NUL terminator of a string field starting at `start`.
/// `Ok(None)` means the terminator has not arrived yet; an error means no
/// terminator can exist within the sub-buffer bound.
fn find_nul(buf: &[u8], start: usize) -> Result<Option<usize>, WireError> {
    let window_end = buf.len().min(start + MAX_SUB_BUFFER);
    let window_start = start.min(buf.len());
    if let Some(pos) = buf[window_start..window_end].iter().position(|&b| b == 0) {
        return Ok(Some(window_start + pos));
    }
    if buf.len() >= start + MAX_SUB_BUFFER {
        return Err(WireError::StringTooLong(MAX_SUB_BUFFER));
    }
    Ok(None)
}

fn string_from(bytes: &[u8]) -> Result<String, WireError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| WireError::InvalidString)
}

/// Validate a string field: must fit the sub-buffer with its terminator and
/// must not embed a NUL of its own.
fn check_string(s: &str) -> Result<(), WireError> {
    if s.len() + 1 > MAX_SUB_BUFFER {
        return Err(WireError::StringTooLong(s.len()));
    }
    if s.as_bytes().contains(&0) {
        return Err(WireError::InvalidString);
    }
    Ok(())
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
