//! Service wiring: builds every component from [`Settings`] and owns their timers

use crate::chain::{ChainProvider, RateSource, RpcClient};
use crate::config::Settings;
use crate::error::WalletResult;
use crate::events::EventBus;
use crate::state::TransactionStore;
use crate::tracking::{HistorySource, HistorySync, HttpHistorySource, PendingTransactionTracker};
use crate::tx::{
    GasLimits, GasPriceCache, GasPriceFeed, HttpGasPriceFeed, NonceManager, RateQuoteClient,
    TransactionPreparer, TransactionSender,
};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// External collaborators the core is built on
pub struct Collaborators {
    pub rpc: Arc<dyn RpcClient>,
    pub rate_source: Arc<dyn RateSource>,
    pub gas_feed: Arc<dyn GasPriceFeed>,
    pub history: Option<Arc<dyn HistorySource>>,
    pub store: Arc<dyn TransactionStore>,
}

/// Owned, injected service instances sharing one event bus
pub struct WalletCore {
    pub events: EventBus,
    pub store: Arc<dyn TransactionStore>,
    pub gas: Arc<GasPriceCache>,
    pub rates: Arc<RateQuoteClient>,
    pub preparer: TransactionPreparer,
    pub sender: TransactionSender,
    pub tracker: Arc<PendingTransactionTracker>,
    pub history: Option<Arc<HistorySync>>,
    gas_interval: Duration,
    poll_interval: Duration,
    history_interval: Duration,
}

impl WalletCore {
    /// Build the core against the configured RPC endpoints, gas feed and indexer
    pub fn connect(settings: &Settings, store: Arc<dyn TransactionStore>) -> WalletResult<Self> {
        let provider = Arc::new(ChainProvider::new(&settings.chain)?);
        info!(
            "Connected chain {} with network contract {}",
            provider.chain_id(),
            settings.chain.network_address
        );

        Self::new(
            settings,
            Collaborators {
                rpc: provider.clone(),
                rate_source: provider,
                gas_feed: Arc::new(HttpGasPriceFeed::new(settings.gas.feed_url.clone())),
                history: settings
                    .tracker
                    .history_url
                    .as_ref()
                    .map(|url| Arc::new(HttpHistorySource::new(url.clone())) as Arc<dyn HistorySource>),
                store,
            },
        )
    }

    pub fn new(settings: &Settings, collaborators: Collaborators) -> WalletResult<Self> {
        let wallet = settings.wallet_address()?;
        let network = settings.network_address()?;
        let Collaborators {
            rpc,
            rate_source,
            gas_feed,
            history,
            store,
        } = collaborators;

        let events = EventBus::new();
        let gas = Arc::new(GasPriceCache::new(gas_feed, &settings.gas, events.clone()));
        let rates = Arc::new(RateQuoteClient::new(rate_source));
        let preparer = TransactionPreparer::new(
            rpc.clone(),
            rates.clone(),
            gas.clone(),
            wallet,
            network,
            GasLimits::from(&settings.gas),
        );
        let nonces = Arc::new(NonceManager::new(wallet, rpc.clone()));
        let sender = TransactionSender::new(rpc.clone(), store.clone(), nonces, wallet, network);
        let tracker = Arc::new(PendingTransactionTracker::new(
            rpc,
            store.clone(),
            events.clone(),
            chrono::Duration::seconds(settings.tracker.grace_period_secs),
        ));
        let history = history.map(|source| {
            Arc::new(HistorySync::new(
                source,
                store.clone(),
                events.clone(),
                wallet,
                settings.tracker.history_rewind_blocks,
            ))
        });

        Ok(Self {
            events,
            store,
            gas,
            rates,
            preparer,
            sender,
            tracker,
            history,
            gas_interval: Duration::from_secs(settings.gas.refresh_interval_secs),
            poll_interval: Duration::from_secs(settings.tracker.poll_interval_secs),
            history_interval: Duration::from_secs(settings.tracker.history_interval_secs),
        })
    }

    /// Start the gas refresh, pending poll and history timers
    pub async fn start(&self) -> WalletResult<()> {
        self.gas.start(self.gas_interval).await?;
        self.tracker.start(self.poll_interval).await?;
        if let Some(history) = &self.history {
            history.start(self.history_interval).await?;
        }
        info!("Wallet core timers started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.gas.stop().await;
        self.tracker.stop().await;
        if let Some(history) = &self.history {
            history.stop().await;
        }
        info!("Wallet core timers stopped");
    }
}
