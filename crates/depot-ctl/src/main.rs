//! depot-ctl — interactive command-line client for the Depot daemon.
//!
//! Keeps one connection open and reads commands from stdin. Allocated chunk
//! ids are kept on a stack; the most recent one is the implicit target of
//! push/pull/store/drop.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use depot_core::wire::{ChunkId, PullSegmentOut, QueryOut, StatusOut, DEFAULT_PORT};
use libdepot::{DaemonClient, ResponseHandler};

// ── Reply handling ────────────────────────────────────────────────────────────

#[derive(Default)]
struct CtlHandler {
    /// Allocated chunk ids; the last one is the current target.
    chunk_ids: Vec<ChunkId>,
    /// Advisory size per chunk, echoed in push segment requests.
    chunk_sizes: HashMap<ChunkId, u32>,
    /// In-flight pull: announced size and bytes received so far.
    pull_expected: u32,
    pull_received: u32,
    pull_data: Vec<u8>,
    waiting_for_pull: bool,
}

impl CtlHandler {
    fn current_chunk(&self) -> Option<ChunkId> {
        self.chunk_ids.last().copied()
    }
}

impl ResponseHandler for CtlHandler {
    fn on_status(&mut self, _client: &mut DaemonClient, packet: &StatusOut) {
        println!("received <StatusOut>");
        println!("  clients : {}", packet.num_clients);
        println!("  chunks  : {}", packet.num_chunks);
        println!("{{");
        for line in packet.info.lines() {
            println!("  {line}");
        }
        println!("}}");
    }

    fn on_memory_push_start(&mut self, _client: &mut DaemonClient, chunk_id: ChunkId) {
        self.chunk_ids.push(chunk_id);
        println!("allocated memory chunk ( {chunk_id} )");
    }

    fn on_memory_pull_start(&mut self, client: &mut DaemonClient, chunk_size: u32) {
        self.pull_expected = chunk_size;
        self.pull_received = 0;
        self.pull_data = vec![0u8; chunk_size as usize];
        self.waiting_for_pull = chunk_size > 0;
        if chunk_size == 0 {
            println!("memory chunk is empty (or unknown)");
        } else if let Err(e) = client.send_memory_pull_segment_request() {
            eprintln!("pull request failed: {e}");
            self.waiting_for_pull = false;
        }
    }

    fn on_memory_pull_segment(&mut self, client: &mut DaemonClient, packet: &PullSegmentOut) {
        let start = packet.segment_offset as usize;
        self.pull_data[start..start + packet.data.len()].copy_from_slice(&packet.data);
        self.pull_received += packet.data.len() as u32;

        if packet.end_offset() < packet.chunk_size {
            if let Err(e) = client.send_memory_pull_segment_request() {
                eprintln!("pull request failed: {e}");
                self.waiting_for_pull = false;
            }
            return;
        }

        self.waiting_for_pull = false;
        println!("pulled {} bytes:", self.pull_received);
        println!("{}", String::from_utf8_lossy(&self.pull_data));
    }

    fn on_memory_query(&mut self, _client: &mut DaemonClient, packet: &QueryOut) {
        if packet.chunk_ids.is_empty() {
            println!("no memory chunks");
            return;
        }
        let ids: Vec<String> = packet.chunk_ids.iter().map(|id| id.to_string()).collect();
        println!("memory chunk ids: {}", ids.join(", "));
    }
}

// ── Command loop ──────────────────────────────────────────────────────────────

fn print_commands() {
    println!("Commands:");
    println!("  status       Query daemon status.");
    println!("  alloc N      Allocate a memory chunk of N bytes.");
    println!("  push TEXT    Push TEXT into the current chunk at offset 0.");
    println!("  pull         Pull the current chunk and print it.");
    println!("  store FILE   Store the current chunk into a server-side file.");
    println!("  drop         Drop the current chunk.");
    println!("  drop all     Drop every chunk this client owns.");
    println!("  query        List this client's chunk ids.");
    println!("  help         Print this text.");
    println!("  exit         Leave.");
}

/// Drain replies the way the reference tool does: give the daemon a moment,
/// then poll until nothing is pending.
fn settle(client: &mut DaemonClient, handler: &mut CtlHandler) -> Result<()> {
    std::thread::sleep(Duration::from_millis(100));
    loop {
        client.recv_responses(handler)?;
        if !handler.waiting_for_pull {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn require_chunk(handler: &CtlHandler) -> Option<ChunkId> {
    let id = handler.current_chunk();
    if id.is_none() {
        println!("no chunk allocated yet — use 'alloc N' first");
    }
    id
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut addr: SocketAddr = ([127, 0, 0, 1], DEFAULT_PORT).into();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                i += 1;
                addr = args
                    .get(i)
                    .context("--addr requires a value")?
                    .parse()
                    .context("--addr must be HOST:PORT")?;
            }
            "help" | "--help" | "-h" => {
                println!("Usage: depot-ctl [--addr HOST:PORT]");
                print_commands();
                return Ok(());
            }
            other => {
                eprintln!("unknown argument: {other}");
                return Ok(());
            }
        }
        i += 1;
    }

    println!("--- depot-ctl ---");
    let mut client = DaemonClient::connect(addr)
        .with_context(|| format!("failed to connect to depotd at {addr} — is it running?"))?;
    println!("connected to {addr}");
    print_commands();

    let mut handler = CtlHandler::default();
    let stdin = std::io::stdin();

    print!("> ");
    std::io::stdout().flush()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();

        match parts.as_slice() {
            [] => {}
            ["exit"] | ["quit"] => break,
            ["help"] => print_commands(),

            ["status"] => {
                client.send_status_request()?;
                settle(&mut client, &mut handler)?;
            }

            ["alloc", n] => match n.parse::<u32>() {
                Ok(size) => {
                    client.send_memory_push_start_request(size)?;
                    settle(&mut client, &mut handler)?;
                    if let Some(id) = handler.current_chunk() {
                        handler.chunk_sizes.insert(id, size);
                    }
                }
                Err(_) => println!("alloc expects a byte count"),
            },

            ["push", ..] => {
                if let Some(id) = require_chunk(&handler) {
                    let text = line.trim_start()[4..].trim_start().to_string();
                    let size = handler.chunk_sizes.get(&id).copied().unwrap_or(0);
                    match client.send_memory_push_segment_request(id, size, 0, text.as_bytes()) {
                        Ok(()) => settle(&mut client, &mut handler)?,
                        Err(e) => println!("push rejected: {e}"),
                    }
                }
            }

            ["pull"] => {
                if let Some(id) = require_chunk(&handler) {
                    client.send_memory_pull_start_request(id)?;
                    settle(&mut client, &mut handler)?;
                }
            }

            ["store", file] => {
                if let Some(id) = require_chunk(&handler) {
                    match client.send_memory_store_request(id, file) {
                        Ok(()) => {
                            settle(&mut client, &mut handler)?;
                            println!("requested store of chunk ( {id} ) to \"{file}\"");
                        }
                        Err(e) => println!("store rejected: {e}"),
                    }
                }
            }

            ["drop"] => {
                if let Some(id) = require_chunk(&handler) {
                    client.send_memory_drop_request(id)?;
                    handler.chunk_ids.pop();
                    handler.chunk_sizes.remove(&id);
                    settle(&mut client, &mut handler)?;
                    println!("dropped memory chunk ( {id} )");
                }
            }

            ["drop", "all"] => {
                client.send_memory_drop_request(depot_core::wire::CHUNK_ID_ALL)?;
                handler.chunk_ids.clear();
                handler.chunk_sizes.clear();
                settle(&mut client, &mut handler)?;
                println!("dropped all memory chunks");
            }

            ["query"] => {
                client.send_memory_query_request()?;
                settle(&mut client, &mut handler)?;
            }

            _ => println!("unknown command — try 'help'"),
        }

        print!("> ");
        std::io::stdout().flush()?;
    }

    client.shutdown()?;
    Ok(())
}
