//! Pending transaction tracking
//!
//! Every poll pass looks at each pending record: a receipt settles it,
//! otherwise a lookup by hash decides whether it failed, was dropped, or
//! was mined without a readable receipt. Each write is preceded by a
//! pending-state check and performed as a compare-and-swap, so a
//! transition is applied and announced at most once.

use crate::chain::RpcClient;
use crate::error::{RemoteError, WalletError, WalletResult};
use crate::events::{EventBus, WalletEvent};
use crate::schedule::PeriodicTask;
use crate::state::{TransactionRecord, TransactionState, TransactionStore};

use chrono::Utc;
use ethers::types::H256;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a single reconciliation did to a pending record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A receipt was found and written
    ReceiptApplied(TransactionState),
    /// The by-hash lookup moved the record to a terminal state
    Transitioned(TransactionState),
    /// The node rejected the hash; the record was deleted
    Dropped,
    /// Nothing conclusive yet
    StillPending,
    /// Another pass resolved the record first
    AlreadyResolved,
}

pub struct PendingTransactionTracker {
    rpc: Arc<dyn RpcClient>,
    store: Arc<dyn TransactionStore>,
    events: EventBus,
    grace_period: chrono::Duration,
    timer: PeriodicTask,
}

impl PendingTransactionTracker {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        store: Arc<dyn TransactionStore>,
        events: EventBus,
        grace_period: chrono::Duration,
    ) -> Self {
        Self {
            rpc,
            store,
            events,
            grace_period,
            timer: PeriodicTask::new("pending transaction poll"),
        }
    }

    /// Cancel any running timer, poll now, then every `period`
    pub async fn start(self: &Arc<Self>, period: Duration) -> WalletResult<()> {
        let tracker = Arc::downgrade(self);
        self.timer
            .start(period, move || {
                let tracker = tracker.clone();
                async move {
                    let Some(tracker) = tracker.upgrade() else {
                        return;
                    };
                    if let Err(e) = tracker.poll_pending().await {
                        warn!("Pending transaction poll failed: {}", e);
                    }
                }
            })
            .await
    }

    pub async fn stop(&self) {
        self.timer.stop().await;
    }

    /// Reconcile every pending record concurrently
    pub async fn poll_pending(&self) -> WalletResult<Vec<(H256, PollOutcome)>> {
        let pending = self.store.pending().await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Polling {} pending transactions", pending.len());

        let results = join_all(pending.iter().map(|tx| self.reconcile(tx))).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (tx, result) in pending.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push((tx.id, outcome)),
                Err(e) => warn!("Failed to reconcile {:?}: {}", tx.id, e),
            }
        }
        Ok(outcomes)
    }

    /// Settle one record from a (possibly stale) snapshot
    pub async fn reconcile(&self, tx: &TransactionRecord) -> WalletResult<PollOutcome> {
        match self.rpc.get_transaction_receipt(tx.id).await {
            Ok(Some(receipt)) => {
                if !self.still_pending(&tx.id).await? {
                    return Ok(PollOutcome::AlreadyResolved);
                }
                let updated = tx.with_receipt(&receipt);
                let state = updated.state;
                if !self.store.settle_if_pending(updated).await? {
                    return Ok(PollOutcome::AlreadyResolved);
                }
                self.announce(tx.id, state);
                return Ok(PollOutcome::ReceiptApplied(state));
            }
            Ok(None) => debug!("No receipt yet for {:?}", tx.id),
            Err(e) => debug!("Receipt fetch for {:?} failed: {}", tx.id, e),
        }

        self.fall_back_to_lookup(tx).await
    }

    async fn fall_back_to_lookup(&self, tx: &TransactionRecord) -> WalletResult<PollOutcome> {
        let lookup = self.rpc.get_transaction_by_hash(tx.id).await;

        if !self.still_pending(&tx.id).await? {
            return Ok(PollOutcome::AlreadyResolved);
        }
        let expired = tx.is_older_than(self.grace_period, Utc::now());

        match lookup {
            Err(WalletError::Remote(RemoteError::ResultParse)) if expired => {
                self.transition(tx.id, TransactionState::Failed).await
            }
            Err(WalletError::Remote(RemoteError::ResultParse)) => Ok(PollOutcome::StillPending),
            Err(WalletError::Remote(RemoteError::Response { code, message })) => {
                warn!(
                    "Dropping {:?}: node rejected lookup ({}: {})",
                    tx.id, code, message
                );
                self.store.delete(&[tx.id]).await?;
                crate::metrics::record_dropped();
                Ok(PollOutcome::Dropped)
            }
            Err(e) => {
                debug!("Lookup of {:?} inconclusive: {}", tx.id, e);
                Ok(PollOutcome::StillPending)
            }
            Ok(_) if expired => self.transition(tx.id, TransactionState::Completed).await,
            Ok(_) => Ok(PollOutcome::StillPending),
        }
    }

    async fn transition(&self, id: H256, state: TransactionState) -> WalletResult<PollOutcome> {
        if !self.store.transition_if_pending(&id, state).await? {
            return Ok(PollOutcome::AlreadyResolved);
        }
        self.announce(id, state);
        Ok(PollOutcome::Transitioned(state))
    }

    async fn still_pending(&self, id: &H256) -> WalletResult<bool> {
        Ok(matches!(
            self.store.get(id).await?,
            Some(record) if !record.state.is_terminal()
        ))
    }

    fn announce(&self, id: H256, state: TransactionState) {
        info!("Transaction {:?} is now {}", id, state.as_str());
        crate::metrics::record_transition(state);
        self.events.publish(WalletEvent::TransactionUpdated(id));
    }
}
