use std::sync::Arc;

use itemsync_client::ClientSynchronizer;
use itemsync_core::{ItemStore, MemoryStore, SyncConfig};
use itemsync_server::SyncServer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,itemsync_server=debug,itemsync_client=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("itemsync demo starting...");

    // Configuration: first argument, then ITEMSYNC_CONFIG, then defaults
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ITEMSYNC_CONFIG").ok());
    let config = match config_path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            SyncConfig::load(&path)?
        }
        None => SyncConfig::default(),
    };
    tracing::debug!("Configuration: {}", serde_json::to_string(&config)?);

    let server = Arc::new(SyncServer::new(config.clone()));
    let shutdown = CancellationToken::new();

    // Spawn mutator and hub loops
    let server_handle = {
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };

    // Spawn clients
    let client_handles: Vec<_> = config
        .clients
        .iter()
        .enumerate()
        .map(|(id, profile)| {
            let client =
                ClientSynchronizer::new(id, server.store(), server.hub(), profile.connection);
            tokio::spawn(client.run(shutdown.clone()))
        })
        .collect();

    tracing::info!(
        "Running {} clients against {} items",
        client_handles.len(),
        server.store().len()
    );

    // Wait for the configured run time or a shutdown signal
    match config.run_for() {
        Some(limit) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down...");
                }
                _ = tokio::time::sleep(limit) => {
                    tracing::info!("Run time of {:?} elapsed, shutting down...", limit);
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C, shutting down...");
        }
    }

    shutdown.cancel();
    server_handle.await??;

    // Consistency check: catch every client up once more and compare
    let store = server.store();
    let snapshot = store.get_all();
    for handle in client_handles {
        let mut client = handle.await?;
        client.resync();
        report_client(&client, &snapshot);
    }

    tracing::info!(
        "Hub statistics: {}",
        serde_json::to_string(&server.statistics())?
    );
    tracing::info!("Shutdown complete");
    Ok(())
}

fn report_client(client: &ClientSynchronizer<MemoryStore>, snapshot: &[itemsync_core::Item]) {
    let diverged = client.cache().diverged_from(snapshot);
    if diverged.is_empty() {
        tracing::info!(
            "Client {}: cache consistent with store ({} items)",
            client.id(),
            client.cache().len()
        );
    } else {
        tracing::warn!(
            "Client {}: {} items differ from store: {:?}",
            client.id(),
            diverged.len(),
            diverged
        );
    }
}
