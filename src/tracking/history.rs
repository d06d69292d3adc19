//! Confirmed transaction history pulled from an indexer

use crate::error::{WalletError, WalletResult};
use crate::events::{EventBus, WalletEvent};
use crate::schedule::PeriodicTask;
use crate::state::{TransactionRecord, TransactionState, TransactionStore};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers::types::{Address, H256, U256};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of confirmed wallet transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Transactions touching `address` mined at or after `start_block`
    async fn fetch(
        &self,
        address: Address,
        start_block: u64,
        page: u32,
    ) -> WalletResult<Vec<TransactionRecord>>;
}

/// Indexer response envelope
#[derive(Debug, Deserialize)]
struct HistoryPage {
    docs: Vec<RawTransaction>,
}

/// Indexer transaction entry; numeric fields arrive as decimal strings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    #[serde(alias = "_id")]
    id: H256,
    block_number: u64,
    time_stamp: String,
    nonce: u64,
    from: Address,
    to: Address,
    value: String,
    gas: String,
    gas_price: String,
    gas_used: String,
}

impl RawTransaction {
    fn into_record(self) -> WalletResult<TransactionRecord> {
        let seconds: i64 = self
            .time_stamp
            .parse()
            .map_err(|_| WalletError::Decode(format!("bad timestamp {}", self.time_stamp)))?;
        let timestamp: DateTime<Utc> = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| WalletError::Decode(format!("timestamp out of range {}", seconds)))?;

        Ok(TransactionRecord {
            id: self.id,
            block_number: self.block_number,
            from: self.from,
            to: self.to,
            value: parse_amount("value", &self.value)?,
            gas: parse_amount("gas", &self.gas)?,
            gas_price: parse_amount("gasPrice", &self.gas_price)?,
            gas_used: parse_amount("gasUsed", &self.gas_used)?,
            nonce: U256::from(self.nonce),
            timestamp,
            state: TransactionState::Completed,
            operations: Vec::new(),
        })
    }
}

fn parse_amount(field: &str, value: &str) -> WalletResult<U256> {
    U256::from_dec_str(value).map_err(|e| WalletError::Decode(format!("{} {:?}: {}", field, value, e)))
}

/// Decode an indexer page, skipping entries that cannot be read
fn records_from_page(page: HistoryPage) -> Vec<TransactionRecord> {
    page.docs
        .into_iter()
        .filter_map(|raw| {
            let id = raw.id;
            raw.into_record()
                .map_err(|e| warn!("Skipping history entry {:?}: {}", id, e))
                .ok()
        })
        .collect()
}

/// reqwest client for the history indexer
pub struct HttpHistorySource {
    client: reqwest::Client,
    url: String,
}

impl HttpHistorySource {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|err| {
                warn!("Failed to build history client ({}); using default client", err);
                reqwest::Client::new()
            });

        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch(
        &self,
        address: Address,
        start_block: u64,
        page: u32,
    ) -> WalletResult<Vec<TransactionRecord>> {
        debug!("Fetching history from block {} page {}", start_block, page);
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("address", format!("{:?}", address)),
                ("startBlock", start_block.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WalletError::Network(format!("history request: {}", e)))?;

        let page: HistoryPage = response
            .json()
            .await
            .map_err(|e| WalletError::Decode(format!("history body: {}", e)))?;

        Ok(records_from_page(page))
    }
}

/// Periodically merges indexer history into the local store
pub struct HistorySync {
    source: Arc<dyn HistorySource>,
    store: Arc<dyn TransactionStore>,
    events: EventBus,
    wallet: Address,
    rewind_blocks: u64,
    timer: PeriodicTask,
}

impl HistorySync {
    pub fn new(
        source: Arc<dyn HistorySource>,
        store: Arc<dyn TransactionStore>,
        events: EventBus,
        wallet: Address,
        rewind_blocks: u64,
    ) -> Self {
        Self {
            source,
            store,
            events,
            wallet,
            rewind_blocks,
            timer: PeriodicTask::new("history sync"),
        }
    }

    /// First block to ask the indexer for
    pub async fn start_block(&self) -> WalletResult<u64> {
        let completed = self.store.completed().await?;
        Ok(match completed.first() {
            Some(latest) => latest.block_number.saturating_sub(self.rewind_blocks),
            None => 1,
        })
    }

    /// Fetch once and merge; returns how many records were written.
    ///
    /// Records already failed or completed locally are left alone; a local
    /// pending record is replaced and announced.
    pub async fn sync_once(&self) -> WalletResult<usize> {
        let start_block = self.start_block().await?;
        let fetched = self.source.fetch(self.wallet, start_block, 0).await?;
        crate::metrics::record_history_fetched(fetched.len());

        let mut written = 0;
        for record in fetched {
            let id = record.id;
            let known = self.store.get(&id).await?.is_some();
            if !self.store.replace_if_pending(record).await? {
                continue;
            }
            written += 1;
            if known {
                crate::metrics::record_transition(TransactionState::Completed);
                self.events.publish(WalletEvent::TransactionUpdated(id));
            }
        }

        if written > 0 {
            info!("History sync wrote {} transactions from block {}", written, start_block);
        }
        Ok(written)
    }

    pub async fn start(self: &Arc<Self>, period: Duration) -> WalletResult<()> {
        let sync = Arc::downgrade(self);
        self.timer
            .start(period, move || {
                let sync = sync.clone();
                async move {
                    if let Some(sync) = sync.upgrade() {
                        if let Err(e) = sync.sync_once().await {
                            warn!("History sync failed: {}", e);
                        }
                    }
                }
            })
            .await
    }

    pub async fn stop(&self) {
        self.timer.stop().await;
    }
}
