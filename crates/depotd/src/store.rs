//! Server-side memory chunk table.
//!
//! Every chunk is a zero-initialized byte buffer tagged with the network
//! address of the client that allocated it. The owner check runs before any
//! other validation, so a foreign client cannot even learn whether an id
//! exists. Chunks outlive their owner's connection; only an explicit drop or
//! an owner purge removes them.
//!
//! The table itself is not synchronized — the server serializes access
//! behind one lock, see `server::DaemonContext`.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

use depot_core::wire::{ChunkId, CHUNK_ID_ALL};

/// Errors reported by chunk-table operations. `NoSuchChunk` deliberately
/// covers both "missing" and "owned by someone else".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no memory chunk ( {0} ) for this owner")]
    NoSuchChunk(ChunkId),

    #[error("segment {offset}+{len} out of bounds for chunk ( {chunk_id} ) of {size} bytes")]
    OutOfBounds {
        chunk_id: ChunkId,
        offset: u32,
        len: usize,
        size: usize,
    },

    #[error("file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

struct MemoryChunk {
    buffer: Vec<u8>,
    owner: SocketAddr,
}

impl MemoryChunk {
    fn is_owner(&self, owner: SocketAddr) -> bool {
        self.owner == owner
    }
}

/// Owner-tagged chunk table keyed by id.
pub struct ChunkStore {
    chunks: BTreeMap<ChunkId, MemoryChunk>,
    next_id: ChunkId,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore {
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Allocate a fresh zero-filled chunk. Always succeeds; size 0 is legal.
    /// Ids are monotonic and never 0.
    pub fn alloc(&mut self, size: u32, owner: SocketAddr) -> ChunkId {
        let id = self.next_id;
        self.next_id += 1;
        self.chunks.insert(
            id,
            MemoryChunk {
                buffer: vec![0u8; size as usize],
                owner,
            },
        );
        id
    }

    /// Remove one chunk. No-op returning `false` when the id is unknown, the
    /// owner does not match, or the id is the reserved sentinel.
    pub fn free(&mut self, id: ChunkId, owner: SocketAddr) -> bool {
        if id == CHUNK_ID_ALL {
            return false;
        }
        match self.chunks.get(&id) {
            Some(chunk) if chunk.is_owner(owner) => {
                self.chunks.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Remove every chunk owned by `owner`. Returns how many were removed.
    pub fn purge_owner(&mut self, owner: SocketAddr) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|_, chunk| !chunk.is_owner(owner));
        before - self.chunks.len()
    }

    /// Copy `data` into an owned chunk at `offset`.
    pub fn push_segment(
        &mut self,
        id: ChunkId,
        owner: SocketAddr,
        offset: u32,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let chunk = self
            .chunks
            .get_mut(&id)
            .filter(|c| c.is_owner(owner))
            .ok_or(StoreError::NoSuchChunk(id))?;
        let size = chunk.buffer.len();
        if !in_bounds(offset, data.len(), size) {
            return Err(StoreError::OutOfBounds {
                chunk_id: id,
                offset,
                len: data.len(),
                size,
            });
        }
        chunk.buffer[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read `len` bytes of an owned chunk starting at `offset`.
    pub fn pull_segment(
        &self,
        id: ChunkId,
        owner: SocketAddr,
        offset: u32,
        len: u32,
    ) -> Result<&[u8], StoreError> {
        let chunk = self
            .chunks
            .get(&id)
            .filter(|c| c.is_owner(owner))
            .ok_or(StoreError::NoSuchChunk(id))?;
        let size = chunk.buffer.len();
        if !in_bounds(offset, len as usize, size) {
            return Err(StoreError::OutOfBounds {
                chunk_id: id,
                offset,
                len: len as usize,
                size,
            });
        }
        Ok(&chunk.buffer[offset as usize..offset as usize + len as usize])
    }

    /// Write the whole buffer of an owned chunk verbatim to `path`.
    pub fn store_to_file(
        &self,
        id: ChunkId,
        owner: SocketAddr,
        path: &Path,
    ) -> Result<(), StoreError> {
        let chunk = self
            .chunks
            .get(&id)
            .filter(|c| c.is_owner(owner))
            .ok_or(StoreError::NoSuchChunk(id))?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(&chunk.buffer)?;
        Ok(())
    }

    /// Size of an owned chunk. Unlike the wire protocol, which can only say
    /// "0", a missing or foreign chunk is a distinct error here.
    pub fn size_of(&self, id: ChunkId, owner: SocketAddr) -> Result<u32, StoreError> {
        self.chunks
            .get(&id)
            .filter(|c| c.is_owner(owner))
            .map(|c| c.buffer.len() as u32)
            .ok_or(StoreError::NoSuchChunk(id))
    }

    /// Number of chunks owned by `owner`.
    pub fn count_for(&self, owner: SocketAddr) -> usize {
        self.chunks.values().filter(|c| c.is_owner(owner)).count()
    }

    /// Number of chunks in the table regardless of owner.
    pub fn count_all(&self) -> usize {
        self.chunks.len()
    }

    /// Table-order ids owned by `owner`.
    pub fn ids_for(&self, owner: SocketAddr) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.is_owner(owner))
            .map(|(id, _)| *id)
            .collect()
    }
}

fn in_bounds(offset: u32, len: usize, size: usize) -> bool {
    // u64 arithmetic: offset + len must not wrap before the comparison
    offset as u64 + len as u64 <= size as u64
}

// ── Tests ─────────────────────────────────────────────────────────────────────
