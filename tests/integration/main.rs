//! Depot integration test harness.
//!
//! Every test binds its own daemon on an ephemeral loopback port, in-process,
//! and drives real `libdepot` clients against it over TCP. No external setup
//! is required.

mod ownership;
mod query;
mod sessions;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::sync::broadcast;

use depot_core::wire::{ChunkId, PullSegmentOut, QueryOut, StatusOut};
use depotd::{DaemonConfig, DaemonServer};
use libdepot::{DaemonClient, ResponseHandler};

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestDaemon {
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
}

/// Bind and run a daemon for one test. Pacing is disabled so tests run at
/// full speed.
pub async fn spawn_daemon(singleton: bool) -> TestDaemon {
    let config = DaemonConfig {
        run_server: true,
        singleton,
        port: 0,
        update_rate_ms: 0,
        ..DaemonConfig::default()
    };
    let server = DaemonServer::bind(config)
        .await
        .expect("failed to bind test daemon");
    let addr = server.local_addr();
    let (shutdown, rx) = broadcast::channel(1);
    tokio::spawn(server.run(rx));
    TestDaemon { addr, shutdown }
}

impl TestDaemon {
    pub fn connect(&self) -> DaemonClient {
        DaemonClient::connect(self.addr).expect("failed to connect test client")
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

// ── Reply recorder ────────────────────────────────────────────────────────────

/// A `ResponseHandler` that records everything it sees. With `auto_pull` it
/// also drives a pull to completion the way the driver's default handlers do,
/// assembling the bytes into `assembled`.
#[derive(Default)]
pub struct Recorder {
    pub auto_pull: bool,
    pub statuses: Vec<StatusOut>,
    pub push_starts: Vec<ChunkId>,
    pub pull_starts: Vec<u32>,
    pub pull_segments: Vec<PullSegmentOut>,
    pub query_pages: Vec<Vec<ChunkId>>,
    pub invalid: Vec<u8>,
    pub pull_expected: Option<u32>,
    pub pull_received: u32,
    pub assembled: Vec<u8>,
}

impl Recorder {
    /// Records replies; pull segments must be requested by the test itself.
    pub fn manual() -> Self {
        Self::default()
    }

    /// Records replies and pulls announced chunks to completion.
    pub fn auto() -> Self {
        Self {
            auto_pull: true,
            ..Self::default()
        }
    }

    pub fn pull_complete(&self) -> bool {
        matches!(self.pull_expected, Some(n) if self.pull_received >= n)
    }

    pub fn queried_ids(&self) -> Vec<ChunkId> {
        self.query_pages.iter().flatten().copied().collect()
    }
}

impl ResponseHandler for Recorder {
    fn on_status(&mut self, _client: &mut DaemonClient, packet: &StatusOut) {
        self.statuses.push(packet.clone());
    }

    fn on_memory_push_start(&mut self, _client: &mut DaemonClient, chunk_id: ChunkId) {
        self.push_starts.push(chunk_id);
    }

    fn on_memory_pull_start(&mut self, client: &mut DaemonClient, chunk_size: u32) {
        self.pull_starts.push(chunk_size);
        self.pull_expected = Some(chunk_size);
        self.pull_received = 0;
        self.assembled = vec![0u8; chunk_size as usize];
        if self.auto_pull && chunk_size > 0 {
            client.send_memory_pull_segment_request().unwrap();
        }
    }

    fn on_memory_pull_segment(&mut self, client: &mut DaemonClient, packet: &PullSegmentOut) {
        let start = packet.segment_offset as usize;
        self.assembled[start..start + packet.data.len()].copy_from_slice(&packet.data);
        self.pull_received += packet.data.len() as u32;
        self.pull_segments.push(packet.clone());
        if self.auto_pull && packet.end_offset() < packet.chunk_size {
            client.send_memory_pull_segment_request().unwrap();
        }
    }

    fn on_memory_query(&mut self, _client: &mut DaemonClient, packet: &QueryOut) {
        self.query_pages.push(packet.chunk_ids.clone());
    }

    fn on_invalid_packet(&mut self, _client: &mut DaemonClient, packet_id: u8) {
        self.invalid.push(packet_id);
    }
}

// ── Drain helpers ─────────────────────────────────────────────────────────────

/// Poll for replies until `pred` holds. Fails after five seconds.
pub async fn drain_until(
    client: &mut DaemonClient,
    recorder: &mut Recorder,
    pred: impl Fn(&Recorder) -> bool,
) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        client.recv_responses(recorder)?;
        if pred(recorder) {
            return Ok(());
        }
        if Instant::now() > deadline {
            bail!(
                "timed out waiting for replies ({} statuses, {} push starts, {} pull starts, {} segments, {} pages)",
                recorder.statuses.len(),
                recorder.push_starts.len(),
                recorder.pull_starts.len(),
                recorder.pull_segments.len(),
                recorder.query_pages.len(),
            );
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Poll for replies for a fixed window, tolerating transport errors — used
/// to assert that nothing (more) arrives.
pub async fn drain_for(client: &mut DaemonClient, recorder: &mut Recorder, window_ms: u64) {
    let deadline = Instant::now() + Duration::from_millis(window_ms);
    while Instant::now() < deadline {
        if client.recv_responses(recorder).is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Breathing room after fire-and-forget requests (push segment, store, drop),
/// which produce no reply to wait on.
pub async fn pause() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
