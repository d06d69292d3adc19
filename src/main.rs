//! Wallet transaction core daemon
//!
//! Refreshes gas prices, polls pending transactions and syncs history for a
//! single wallet, exposing Prometheus metrics while it runs.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use wallet_txcore::config::Settings;
use wallet_txcore::metrics::MetricsServer;
use wallet_txcore::state::InMemoryTransactionStore;
use wallet_txcore::{WalletCore, WalletEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting wallet-txcore v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for wallet {} on chain {}",
        settings.wallet.address, settings.chain.chain_id
    );

    let store = Arc::new(InMemoryTransactionStore::new());
    let core = WalletCore::connect(&settings, store.clone())?;

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Log every event published by the core
    let event_handle = tokio::spawn({
        let mut events = core.events.subscribe();
        let store = store.clone();
        async move {
            loop {
                match events.recv().await {
                    Ok(WalletEvent::TransactionUpdated(id)) => {
                        info!("Transaction {:?} updated, store now {:?}", id, store.stats());
                    }
                    Ok(event) => info!("Event: {}", event.name()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event logger lagged, skipped {} events", skipped);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    core.start().await?;

    info!("wallet-txcore is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    core.stop().await;
    event_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("wallet-txcore stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wallet_txcore=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
