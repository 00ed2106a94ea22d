//! Daemon server: listening socket, client registration, session spawning.
//!
//! One task accepts connections; every registered client gets its own
//! session task. All shared state lives in `DaemonContext`, which is handed
//! to every handler — there is no process-global server instance.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};

use crate::config::DaemonConfig;
use crate::session;
use crate::store::ChunkStore;

/// Process-wide daemon state, shared by every session.
pub struct DaemonContext {
    pub config: DaemonConfig,
    /// The chunk table. Sessions run concurrently, so every access — including
    /// iteration — goes through this lock. Guards are never held across a
    /// socket await.
    pub store: Mutex<ChunkStore>,
    /// Registered clients by peer address.
    pub clients: DashMap<SocketAddr, ()>,
}

impl DaemonContext {
    pub fn new(config: DaemonConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            store: Mutex::new(ChunkStore::new()),
            clients: DashMap::new(),
        })
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }
}

pub struct DaemonServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<DaemonContext>,
}

impl DaemonServer {
    /// Bind the listening socket on loopback. Port 0 asks the OS for an
    /// ephemeral port; `local_addr` reports the effective one.
    pub async fn bind(config: DaemonConfig) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", config.port))
            .await
            .with_context(|| format!("failed to bind daemon server on port {}", config.port))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read listener address")?;
        tracing::info!(addr = %local_addr, "started server");
        Ok(Self {
            listener,
            local_addr,
            ctx: DaemonContext::new(config),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> Arc<DaemonContext> {
        self.ctx.clone()
    }

    /// Accept-and-register loop. Runs until the shutdown channel fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("server shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            // Accept failures are non-fatal; skip this one.
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };

                    // Every queued connection is accepted to flush the
                    // backlog, but registration is refused in singleton mode
                    // while another client is live. The rejected socket is
                    // simply closed — no reply.
                    if self.ctx.config.singleton && !self.ctx.clients.is_empty() {
                        tracing::debug!(peer = %peer, "rejecting connection (singleton)");
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "set_nodelay failed");
                    }

                    self.ctx.clients.insert(peer, ());
                    tracing::info!(peer = %peer, "register client");
                    tokio::spawn(session::run(
                        stream,
                        peer,
                        self.ctx.clone(),
                        shutdown.resubscribe(),
                    ));
                }
            }
        }
    }
}
