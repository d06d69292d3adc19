//! Transaction records stored locally

use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, TransactionReceipt, H256, U256, U64};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Pending)
    }
}

/// Human-oriented description of what a transaction moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedOperation {
    pub from: Address,
    pub to: Address,
    pub contract: Option<Address>,
    /// "transfer" or "exchange"
    pub kind: String,
    pub value: U256,
    pub symbol: Option<String>,
    pub decimals: u32,
}

/// A transaction known to the wallet, pending or settled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: H256,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub gas: U256,
    pub gas_price: U256,
    pub gas_used: U256,
    pub nonce: U256,
    pub timestamp: DateTime<Utc>,
    pub state: TransactionState,
    pub operations: Vec<LocalizedOperation>,
}

impl TransactionRecord {
    /// Whether the record was submitted more than `grace` ago
    pub fn is_older_than(&self, grace: Duration, now: DateTime<Utc>) -> bool {
        self.timestamp + grace < now
    }

    /// Build the updated record described by a mined receipt
    pub fn with_receipt(&self, receipt: &TransactionReceipt) -> Self {
        let state = match receipt.status {
            Some(status) if status == U64::zero() => TransactionState::Failed,
            _ => TransactionState::Completed,
        };

        Self {
            block_number: receipt
                .block_number
                .map(|b| b.as_u64())
                .unwrap_or(self.block_number),
            gas_used: receipt.gas_used.unwrap_or(self.gas_used),
            state,
            ..self.clone()
        }
    }
}
