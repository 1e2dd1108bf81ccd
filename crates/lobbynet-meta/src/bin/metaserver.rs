//! The `metaserver` binary.
//!
//! Configuration comes from the environment (see
//! [`MetaConfig::from_env`]). No registered accounts are loaded; every
//! player logs in anonymously. The server stops on Ctrl-C or when `quit`
//! is typed on standard input.

use lobbynet_meta::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = MetaConfig::from_env();
    tracing::info!(
        relay = %config.relay_public_addr,
        relay_bridge = %config.relay_bridge_addr,
        "starting matchmaking server"
    );
    let server = MetaServer::builder()
        .config(config)
        .users(InMemoryUsers::new())
        .build()
        .await?;
    let handle = server.handle();
    let mut running = tokio::spawn(server.run());

    let finished = tokio::select! {
        () = quit_requested() => None,
        finished = &mut running => Some(finished),
    };
    match finished {
        Some(result) => result??,
        None => {
            handle.shutdown().await;
            running.await??;
        }
    }
    Ok(())
}

/// Resolves on Ctrl-C or a `quit` line on stdin.
async fn quit_requested() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let stdin_quit = async {
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == "quit" {
                return;
            }
        }
        std::future::pending::<()>().await
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
            }
        }
        () = stdin_quit => {}
    }
    tracing::info!("shutdown requested");
}
