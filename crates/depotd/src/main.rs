//! depotd — Depot daemon process entry point.

use anyhow::Result;
use tokio::sync::broadcast;

use depot_core::wire::PROTOCOL_VERSION;
use depotd::{config, log, DaemonConfig, DaemonServer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env_and_args(std::env::args().skip(1));

    if config.show_help {
        config::print_usage();
        return Ok(());
    }
    if !config.run_server {
        println!("depotd: no input");
        println!("enter 'depotd help' for information");
        return Ok(());
    }

    log::init(&config)?;
    tracing::info!(
        protocol_version = PROTOCOL_VERSION,
        port = config.port,
        "running depot daemon"
    );

    // Ctrl-c flips the shutdown channel; the server and every session listen.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let server = DaemonServer::bind(config).await?;
    server.run(shutdown_tx.subscribe()).await
}
