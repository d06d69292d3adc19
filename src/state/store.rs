//! Transaction store contract and in-memory implementation

use super::record::{TransactionRecord, TransactionState};
use crate::error::WalletResult;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::H256;
use std::cmp::Reverse;
use tracing::debug;

/// Persistent store of wallet transactions keyed by hash
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn get(&self, id: &H256) -> WalletResult<Option<TransactionRecord>>;

    /// Insert or overwrite records
    async fn add(&self, txs: Vec<TransactionRecord>) -> WalletResult<()>;

    /// Unconditionally set the state of a stored record
    async fn update_state(&self, id: &H256, state: TransactionState) -> WalletResult<()>;

    /// Move a record out of `pending`; returns false if it already left it
    async fn transition_if_pending(&self, id: &H256, state: TransactionState) -> WalletResult<bool>;

    /// Overwrite a record only while the stored copy is still pending (or absent)
    async fn replace_if_pending(&self, tx: TransactionRecord) -> WalletResult<bool>;

    /// Overwrite a stored pending record; never creates one
    async fn settle_if_pending(&self, tx: TransactionRecord) -> WalletResult<bool>;

    async fn delete(&self, ids: &[H256]) -> WalletResult<()>;

    async fn pending(&self) -> WalletResult<Vec<TransactionRecord>>;

    /// Completed records, most recent first
    async fn completed(&self) -> WalletResult<Vec<TransactionRecord>>;
}

/// Transaction statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}

/// In-memory store; each record sits behind its own shard lock
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    records: DashMap<H256, TransactionRecord>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count records per state
    pub fn stats(&self) -> TransactionStats {
        let mut stats = TransactionStats::default();
        for entry in self.records.iter() {
            match entry.value().state {
                TransactionState::Pending => stats.pending += 1,
                TransactionState::Completed => stats.completed += 1,
                TransactionState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn by_state(&self, state: TransactionState) -> Vec<TransactionRecord> {
        self.records
            .iter()
            .filter(|entry| entry.value().state == state)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn get(&self, id: &H256) -> WalletResult<Option<TransactionRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn add(&self, txs: Vec<TransactionRecord>) -> WalletResult<()> {
        for tx in txs {
            self.records.insert(tx.id, tx);
        }
        Ok(())
    }

    async fn update_state(&self, id: &H256, state: TransactionState) -> WalletResult<()> {
        if let Some(mut record) = self.records.get_mut(id) {
            record.state = state;
        }
        Ok(())
    }

    async fn transition_if_pending(&self, id: &H256, state: TransactionState) -> WalletResult<bool> {
        match self.records.get_mut(id) {
            Some(mut record) if !record.state.is_terminal() => {
                record.state = state;
                Ok(true)
            }
            Some(record) => {
                debug!(
                    "Skipping transition of {:?} to {}: already {}",
                    id,
                    state.as_str(),
                    record.state.as_str()
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn replace_if_pending(&self, tx: TransactionRecord) -> WalletResult<bool> {
        match self.records.entry(tx.id) {
            Entry::Occupied(mut entry) => {
                if entry.get().state.is_terminal() {
                    return Ok(false);
                }
                entry.insert(tx);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(tx);
                Ok(true)
            }
        }
    }

    async fn settle_if_pending(&self, tx: TransactionRecord) -> WalletResult<bool> {
        match self.records.get_mut(&tx.id) {
            Some(mut record) if !record.state.is_terminal() => {
                *record = tx;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                debug!("Not settling {:?}: no longer stored", tx.id);
                Ok(false)
            }
        }
    }

    async fn delete(&self, ids: &[H256]) -> WalletResult<()> {
        for id in ids {
            self.records.remove(id);
        }
        Ok(())
    }

    async fn pending(&self) -> WalletResult<Vec<TransactionRecord>> {
        let mut pending = self.by_state(TransactionState::Pending);
        pending.sort_by_key(|tx| tx.timestamp);
        Ok(pending)
    }

    async fn completed(&self) -> WalletResult<Vec<TransactionRecord>> {
        let mut completed = self.by_state(TransactionState::Completed);
        completed.sort_by_key(|tx| Reverse((tx.block_number, tx.timestamp)));
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::pending_record;

    #[tokio::test]
    async fn test_transition_only_once() {
        let store = InMemoryTransactionStore::new();
        let id = H256::repeat_byte(0x01);
        store.add(vec![pending_record(id, 0)]).await.unwrap();

        assert!(store
            .transition_if_pending(&id, TransactionState::Failed)
            .await
            .unwrap());
        assert!(!store
            .transition_if_pending(&id, TransactionState::Completed)
            .await
            .unwrap());
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().state,
            TransactionState::Failed
        );
    }

    #[tokio::test]
    async fn test_replace_if_pending_respects_terminal_state() {
        let store = InMemoryTransactionStore::new();
        let id = H256::repeat_byte(0x02);
        let record = pending_record(id, 0);
        store.add(vec![record.clone()]).await.unwrap();

        let mut mined = record.clone();
        mined.state = TransactionState::Completed;
        mined.block_number = 42;
        assert!(store.replace_if_pending(mined.clone()).await.unwrap());

        let mut late = record;
        late.state = TransactionState::Failed;
        assert!(!store.replace_if_pending(late).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap().unwrap(), mined);
    }

    #[tokio::test]
    async fn test_settle_if_pending_never_recreates_deleted_record() {
        let store = InMemoryTransactionStore::new();
        let id = H256::repeat_byte(0x09);
        let record = pending_record(id, 0);
        let mut mined = record.clone();
        mined.state = TransactionState::Completed;

        assert!(!store.settle_if_pending(mined.clone()).await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());

        store.add(vec![record]).await.unwrap();
        assert!(store.settle_if_pending(mined.clone()).await.unwrap());
        assert!(!store.settle_if_pending(mined.clone()).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap().unwrap(), mined);
    }

    #[tokio::test]
    async fn test_replace_if_pending_inserts_unknown_record() {
        let store = InMemoryTransactionStore::new();
        let mut mined = pending_record(H256::repeat_byte(0x0a), 0);
        mined.state = TransactionState::Completed;

        assert!(store.replace_if_pending(mined.clone()).await.unwrap());
        assert_eq!(store.get(&mined.id).await.unwrap().unwrap(), mined);
    }

    #[tokio::test]
    async fn test_completed_ordered_by_recency() {
        let store = InMemoryTransactionStore::new();
        let mut older = pending_record(H256::repeat_byte(0x03), 0);
        older.state = TransactionState::Completed;
        older.block_number = 100;
        let mut newer = pending_record(H256::repeat_byte(0x04), 0);
        newer.state = TransactionState::Completed;
        newer.block_number = 200;
        store
            .add(vec![older, newer, pending_record(H256::repeat_byte(0x05), 0)])
            .await
            .unwrap();

        let completed = store.completed().await.unwrap();
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].block_number, 200);
        assert_eq!(store.pending().await.unwrap().len(), 1);
        assert_eq!(
            store.stats(),
            TransactionStats {
                pending: 1,
                completed: 2,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let store = InMemoryTransactionStore::new();
        let id = H256::repeat_byte(0x06);
        store.add(vec![pending_record(id, 0)]).await.unwrap();
        store.delete(&[id]).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_state_is_unconditional() {
        let store = InMemoryTransactionStore::new();
        let id = H256::repeat_byte(0x07);
        store.add(vec![pending_record(id, 0)]).await.unwrap();

        store.update_state(&id, TransactionState::Failed).await.unwrap();
        store.update_state(&id, TransactionState::Completed).await.unwrap();
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().state,
            TransactionState::Completed
        );

        // Unknown ids are ignored
        store
            .update_state(&H256::repeat_byte(0x08), TransactionState::Failed)
            .await
            .unwrap();
        assert_eq!(store.stats().completed, 1);
    }
}
