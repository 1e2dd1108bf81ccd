//! The `relay` binary.
//!
//! Configuration comes from the environment (see
//! [`RelayConfig::from_env`]). The server stops on Ctrl-C or when `quit`
//! is typed on standard input.

use lobbynet_relay::{RelayConfig, RelayServer};
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

    let server = RelayServer::builder()
        .config(RelayConfig::from_env())
        .build()
        .await?;
    let handle = server.handle();
    let running = tokio::spawn(server.run());

    quit_requested().await;
    handle.shutdown().await;

    running.await??;
    Ok(())
}

/// Resolves on Ctrl-C or a `quit` line on stdin.
async fn quit_requested() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let stdin_quit = async {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim() == "quit" => return,
                Ok(Some(_)) => {}
                // Without a usable stdin only Ctrl-C can stop us.
                Ok(None) | Err(_) => std::future::pending::<()>().await,
            }
        }
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
