//! Submission of signed transactions and creation of their pending records

use super::draft::{DraftOverrides, DraftTransaction, TransactionKind};
use super::nonce::NonceManager;
use crate::chain::RpcClient;
use crate::error::{RemoteError, WalletError, WalletResult};
use crate::state::{LocalizedOperation, TransactionRecord, TransactionState, TransactionStore};

use chrono::Utc;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_SEND_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Sends signed transactions and records them as pending
pub struct TransactionSender {
    rpc: Arc<dyn RpcClient>,
    store: Arc<dyn TransactionStore>,
    nonces: Arc<NonceManager>,
    wallet: Address,
    network: Address,
}

impl TransactionSender {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        store: Arc<dyn TransactionStore>,
        nonces: Arc<NonceManager>,
        wallet: Address,
        network: Address,
    ) -> Self {
        Self {
            rpc,
            store,
            nonces,
            wallet,
            network,
        }
    }

    /// Fill the draft's nonce if the caller did not choose one
    pub async fn assign_nonce(&self, draft: &DraftTransaction) -> WalletResult<DraftTransaction> {
        if draft.nonce.is_some() {
            return Ok(draft.clone());
        }
        let nonce = self.nonces.next_nonce().await?;
        Ok(draft.copy_with_overrides(DraftOverrides {
            nonce: Some(nonce),
            ..Default::default()
        }))
    }

    /// Broadcast `signed` (the signed form of `draft`) and store it as pending.
    ///
    /// Nothing is stored when the node rejects the transaction.
    pub async fn submit(
        &self,
        draft: &DraftTransaction,
        signed: Bytes,
        nonce: U256,
    ) -> WalletResult<TransactionRecord> {
        let hash = self.send_with_retry(signed).await?;

        // The node holds the nonce from here on, even if the store write fails
        self.nonces.mark_used(nonce).await;
        let record = self.pending_record(hash, draft, nonce);
        self.store.add(vec![record.clone()]).await?;

        crate::metrics::record_submitted(draft.kind_label());
        info!(
            "Submitted {} {:?} with nonce {}",
            draft.kind_label(),
            hash,
            nonce
        );
        Ok(record)
    }

    async fn send_with_retry(&self, signed: Bytes) -> WalletResult<H256> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.rpc.send_raw_transaction(signed.clone()).await {
                Ok(hash) => return Ok(hash),
                Err(e) if e.is_retryable() && attempts < MAX_SEND_ATTEMPTS => {
                    warn!(
                        "Send failed (attempt {}/{}): {}",
                        attempts, MAX_SEND_ATTEMPTS, e
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(WalletError::Remote(RemoteError::Response { message, .. }))
                    if message.contains("nonce too low") =>
                {
                    warn!("Nonce too low, syncing with chain");
                    if let Err(e) = self.nonces.sync().await {
                        warn!("Nonce sync failed: {}", e);
                    }
                    return Err(WalletError::Nonce {
                        address: format!("{:?}", self.wallet),
                        message,
                    });
                }
                Err(e) => {
                    error!("Failed to send transaction: {}", e);
                    return Err(e);
                }
            }
        }
    }

    fn pending_record(&self, id: H256, draft: &DraftTransaction, nonce: U256) -> TransactionRecord {
        let token = &draft.from_token;
        let (kind, to) = match &draft.kind {
            TransactionKind::Transfer { recipient } => ("transfer", *recipient),
            TransactionKind::Swap { .. } => ("exchange", self.network),
        };

        TransactionRecord {
            id,
            block_number: 0,
            from: self.wallet,
            to: draft.destination(self.network),
            value: if token.is_eth() { draft.amount } else { U256::zero() },
            gas: draft.gas_limit.unwrap_or_default(),
            gas_price: draft.gas_price.unwrap_or_default(),
            gas_used: U256::zero(),
            nonce,
            timestamp: Utc::now(),
            state: TransactionState::Pending,
            operations: vec![LocalizedOperation {
                from: self.wallet,
                to,
                contract: (!token.is_eth()).then_some(token.address),
                kind: kind.to_string(),
                value: draft.amount,
                symbol: Some(token.symbol.clone()),
                decimals: token.decimals,
            }],
        }
    }
}
