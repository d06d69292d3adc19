//! Wallet events published to in-process subscribers
//!
//! Components own an injected [`EventBus`] instead of posting to a global
//! notification namespace.

use ethers::types::H256;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the gas cache and the transaction trackers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// A gas price refresh succeeded
    GasPricesUpdated,
    /// A tracked transaction changed
    TransactionUpdated(H256),
}

impl WalletEvent {
    /// Get event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            WalletEvent::GasPricesUpdated => "gas_prices_updated",
            WalletEvent::TransactionUpdated(_) => "transaction_updated",
        }
    }
}

/// Broadcast channel shared by the publishing components
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WalletEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish
    pub fn publish(&self, event: WalletEvent) {
        trace!("Publishing {}", event.name());
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
