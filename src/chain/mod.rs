//! Chain module - Ethereum JSON-RPC access and exchange contract calls
//!
//! This module provides:
//! - The [`RpcClient`] and [`RateSource`] contracts consumed by the core
//! - Multi-RPC provider with automatic failover
//! - Exchange network contract call encoding/decoding

pub mod exchange;
pub mod provider;

pub use provider::ChainProvider;

use crate::error::WalletResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};

/// Ethereum JSON-RPC calls used by the transaction core
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Native ETH balance
    async fn get_balance(&self, address: Address) -> WalletResult<U256>;

    /// ERC-20 `balanceOf(address)` on `contract`
    async fn get_token_balance(&self, address: Address, contract: Address) -> WalletResult<U256>;

    async fn get_transaction_count(&self, address: Address) -> WalletResult<U256>;

    async fn send_raw_transaction(&self, signed: Bytes) -> WalletResult<H256>;

    /// `None` while the transaction is not mined
    async fn get_transaction_receipt(&self, hash: H256) -> WalletResult<Option<TransactionReceipt>>;

    /// Fails with a structured remote error when the node cannot return the transaction
    async fn get_transaction_by_hash(&self, hash: H256) -> WalletResult<Transaction>;

    async fn estimate_gas(&self, tx: TypedTransaction) -> WalletResult<U256>;
}

/// On-chain exchange rate query, reported at 18-decimal precision
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Returns `(expected_rate, slippage_rate)`
    async fn expected_rate(
        &self,
        source: Address,
        dest: Address,
        amount: U256,
    ) -> WalletResult<(U256, U256)>;
}
