//! Per-connection protocol processing.
//!
//! A session drains whatever bytes its socket currently holds, then
//! dispatches every complete packet in arrival order. A shutdown request or
//! transport error only marks the session for removal; the remaining packets
//! of the pass still dispatch, and teardown happens at the end of the pass.
//!
//! Pull state is session-local: `MemoryPullStartIn` queues a task with a size
//! snapshot, and each `MemoryPullSegmentIn` serves the front task FIFO.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use depot_core::wire::{
    ChunkId, PullSegmentOut, QueryOut, Request, Response, StatusOut, CHUNK_ID_ALL, MAX_PACKET_SIZE,
    MAX_QUERY_IDS, MAX_SUB_BUFFER,
};

use crate::server::DaemonContext;
use crate::store::ChunkStore;

/// One queued chunk download. The size is snapshot at pull start; the cursor
/// only grows and the task is dropped once it reaches the snapshot.
#[derive(Debug)]
pub struct PullTask {
    pub chunk_id: ChunkId,
    pub chunk_size: u32,
    pub segment_offset: u32,
}

/// Session task entry point. Removes the client from the registry on exit.
pub async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<DaemonContext>,
    shutdown: broadcast::Receiver<()>,
) {
    let mut session = Session {
        stream,
        peer,
        ctx: ctx.clone(),
        read_buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
        write_buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
        pull_tasks: VecDeque::new(),
        pending_removal: false,
    };

    if let Err(e) = session.drive(shutdown).await {
        tracing::debug!(peer = %peer, error = %e, "session ended with transport error");
    }

    ctx.clients.remove(&peer);
    tracing::info!(peer = %peer, "unregister client");
}

struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<DaemonContext>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    pull_tasks: VecDeque<PullTask>,
    pending_removal: bool,
}

impl Session {
    async fn drive(&mut self, mut shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                ready = self.stream.ready(Interest::READABLE) => { ready?; }
            }

            self.fill_read_buf();
            self.dispatch_pass().await?;

            if self.pending_removal {
                return Ok(());
            }

            // Cooperative pacing between passes, like the reference loop's
            // fixed sleep. 0 = no pacing.
            let pace = self.ctx.config.update_rate_ms;
            if pace > 0 {
                tokio::time::sleep(Duration::from_millis(pace)).await;
            }
        }
    }

    /// Pull everything currently available off the socket. Transport errors
    /// and EOF mark the session for removal instead of aborting the pass.
    fn fill_read_buf(&mut self) {
        loop {
            match self.stream.try_read_buf(&mut self.read_buf) {
                Ok(0) => {
                    tracing::debug!(peer = %self.peer, "connection closed by peer");
                    self.pending_removal = true;
                    return;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    tracing::warn!(peer = %self.peer, error = %e, "recv failed");
                    self.pending_removal = true;
                    return;
                }
            }
        }
    }

    /// Dispatch every complete packet in the read buffer, in arrival order.
    async fn dispatch_pass(&mut self) -> io::Result<()> {
        loop {
            match Request::decode(&mut self.read_buf) {
                Ok(Some(request)) => self.handle(request).await?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    // Protocol violation: log, keep the connection, discard
                    // the buffered bytes — the stream cannot be resynchronized
                    // past an unframed packet.
                    tracing::warn!(peer = %self.peer, error = %e, "invalid packet from client");
                    self.read_buf.clear();
                    return Ok(());
                }
            }
        }
    }

    async fn handle(&mut self, request: Request) -> io::Result<()> {
        match request {
            Request::ClientShutDown => {
                tracing::debug!(peer = %self.peer, "process <ClientShutDownIn>");
                self.pending_removal = true;
            }

            Request::Status => {
                tracing::debug!(peer = %self.peer, "process <StatusIn>");
                let num_chunks = {
                    let store = self.ctx.store.lock().await;
                    store.count_for(self.peer) as u32
                };
                let num_clients = u8::try_from(self.ctx.num_clients()).unwrap_or(u8::MAX);
                self.send(Response::Status(StatusOut {
                    num_clients,
                    num_chunks,
                    info: self.ctx.config.status_info(),
                }))
                .await?;
            }

            Request::MemoryPushStart { chunk_size } => {
                tracing::debug!(peer = %self.peer, "process <MemoryPushStartIn>");
                let chunk_id = {
                    let mut store = self.ctx.store.lock().await;
                    store.alloc(chunk_size, self.peer)
                };
                tracing::debug!(chunk_id, chunk_size, "allocate memory chunk");
                self.send(Response::MemoryPushStart { chunk_id }).await?;
            }

            Request::MemoryPushSegment {
                chunk_id,
                segment_offset,
                data,
                ..
            } => {
                tracing::debug!(
                    peer = %self.peer,
                    chunk_id,
                    segment_offset,
                    segment_size = data.len(),
                    "process <MemoryPushSegmentIn>"
                );
                let result = {
                    let mut store = self.ctx.store.lock().await;
                    store.push_segment(chunk_id, self.peer, segment_offset, &data)
                };
                if let Err(e) = result {
                    // Failure is logged only; the client gets no reply.
                    tracing::warn!(peer = %self.peer, error = %e, "pushing segment to memory chunk failed");
                }
            }

            Request::MemoryPullStart { chunk_id } => {
                tracing::debug!(peer = %self.peer, chunk_id, "process <MemoryPullStartIn>");
                // Snapshot the size; an unknown or foreign chunk reads as 0
                // on the wire, and the task is queued regardless — it will be
                // consumed silently by the next segment request.
                let chunk_size = {
                    let store = self.ctx.store.lock().await;
                    store.size_of(chunk_id, self.peer).unwrap_or(0)
                };
                self.pull_tasks.push_back(PullTask {
                    chunk_id,
                    chunk_size,
                    segment_offset: 0,
                });
                tracing::debug!(chunk_id, chunk_size, "begin to pull memory chunk");
                self.send(Response::MemoryPullStart { chunk_size }).await?;
            }

            Request::MemoryPullSegment => {
                tracing::debug!(peer = %self.peer, "process <MemoryPullSegmentIn>");
                let reply = {
                    let store = self.ctx.store.lock().await;
                    next_pull_segment(&mut self.pull_tasks, &store, self.peer)
                };
                if let Some(response) = reply {
                    self.send(response).await?;
                }
            }

            Request::MemoryStore { chunk_id, filename } => {
                tracing::debug!(peer = %self.peer, chunk_id, filename = %filename, "process <MemoryStoreIn>");
                let result = {
                    let store = self.ctx.store.lock().await;
                    store.store_to_file(chunk_id, self.peer, Path::new(&filename))
                };
                if let Err(e) = result {
                    tracing::warn!(peer = %self.peer, error = %e, "storing memory chunk to file failed");
                }
            }

            Request::MemoryDrop { chunk_id } => {
                tracing::debug!(peer = %self.peer, chunk_id, "process <MemoryDropIn>");
                let mut store = self.ctx.store.lock().await;
                if chunk_id == CHUNK_ID_ALL {
                    let purged = store.purge_owner(self.peer);
                    tracing::debug!(peer = %self.peer, purged, "drop all memory chunks");
                } else if store.free(chunk_id, self.peer) {
                    tracing::debug!(chunk_id, "drop memory chunk");
                } else {
                    tracing::warn!(peer = %self.peer, chunk_id, "dropping memory chunk failed");
                }
            }

            Request::MemoryQuery => {
                tracing::debug!(peer = %self.peer, "process <MemoryQueryIn>");
                let chunk_ids = {
                    let store = self.ctx.store.lock().await;
                    store.ids_for(self.peer)
                };
                for page in query_pages(chunk_ids) {
                    self.send(Response::MemoryQuery(page)).await?;
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, response: Response) -> io::Result<()> {
        self.write_buf.clear();
        if let Err(e) = response.encode(&mut self.write_buf) {
            // Only reachable if the daemon built an over-limit reply itself.
            tracing::error!(peer = %self.peer, error = %e, "failed to encode reply");
            return Ok(());
        }
        self.stream.write_all(&self.write_buf).await
    }
}

/// Serve the front pull task: read the next `min(remaining, 1024)` bytes and
/// advance the cursor, dropping the task once it is exhausted. A stale task
/// (chunk gone mid-pull, or a 0-size snapshot) is consumed without a reply.
/// An empty queue is a silent no-op.
pub fn next_pull_segment(
    tasks: &mut VecDeque<PullTask>,
    store: &ChunkStore,
    owner: SocketAddr,
) -> Option<Response> {
    let (chunk_id, chunk_size, segment_offset) = {
        let task = tasks.front()?;
        (task.chunk_id, task.chunk_size, task.segment_offset)
    };

    if segment_offset < chunk_size {
        let len = (chunk_size - segment_offset).min(MAX_SUB_BUFFER as u32);
        return match store.pull_segment(chunk_id, owner, segment_offset, len) {
            Ok(bytes) => {
                let reply = Response::MemoryPullSegment(PullSegmentOut {
                    chunk_id,
                    chunk_size,
                    segment_offset,
                    data: Bytes::copy_from_slice(bytes),
                });
                if let Some(task) = tasks.front_mut() {
                    task.segment_offset += len;
                    if task.segment_offset >= task.chunk_size {
                        tasks.pop_front();
                    }
                }
                Some(reply)
            }
            Err(e) => {
                tracing::warn!(chunk_id, error = %e, "pulling segment from memory chunk failed");
                tasks.pop_front();
                None
            }
        };
    }

    // Nothing left to send for this task.
    tasks.pop_front();
    None
}

/// Split an id list into query reply pages. An empty list still produces one
/// (empty) page so the client always hears back.
pub fn query_pages(chunk_ids: Vec<ChunkId>) -> Vec<QueryOut> {
    if chunk_ids.is_empty() {
        return vec![QueryOut { chunk_ids }];
    }
    chunk_ids
        .chunks(MAX_QUERY_IDS)
        .map(|page| QueryOut {
            chunk_ids: page.to_vec(),
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
