//! Chain provider with multi-RPC support and automatic failover

use super::exchange::{decode_expected_rate, decode_uint, encode_balance_of, encode_get_expected_rate};
use super::{RateSource, RpcClient};
use crate::config::ChainConfig;
use crate::error::{RemoteError, WalletError, WalletResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain ID
    chain_id: u64,
    /// Exchange network contract
    network_address: Address,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: &ChainConfig) -> WalletResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(WalletError::Network(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        let network_address = config
            .network_address
            .parse()
            .map_err(|e| WalletError::Config(format!("Invalid network address: {}", e)))?;

        Ok(Self {
            chain_id: config.chain_id,
            network_address,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Run a read call, failing over on transport errors only
    async fn read<T, F, Fut>(&self, op: &str, call: F) -> WalletResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match call(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let err = map_provider_error(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    warn!("{} failed on chain {}: {}", op, self.chain_id, err);
                    last_error = Some(err);
                    self.failover();
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            WalletError::Network(format!("All providers failed for {}", op))
        }))
    }

    async fn eth_call(&self, to: Address, data: Bytes) -> WalletResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.read("eth_call", |p| {
            let tx = tx.clone();
            async move { p.call(&tx, None).await }
        })
        .await
    }
}

/// Map a provider error onto the wallet taxonomy
fn map_provider_error(err: ProviderError) -> WalletError {
    if let Some(resp) = RpcError::as_error_response(&err) {
        return RemoteError::Response {
            code: resp.code,
            message: resp.message.clone(),
        }
        .into();
    }
    if RpcError::as_serde_error(&err).is_some() {
        return WalletError::Decode(err.to_string());
    }
    WalletError::Network(err.to_string())
}

#[async_trait]
impl RpcClient for ChainProvider {
    async fn get_balance(&self, address: Address) -> WalletResult<U256> {
        self.read("eth_getBalance", |p| async move { p.get_balance(address, None).await })
            .await
    }

    async fn get_token_balance(&self, address: Address, contract: Address) -> WalletResult<U256> {
        let result = self.eth_call(contract, encode_balance_of(address)).await?;
        decode_uint(&result)
    }

    async fn get_transaction_count(&self, address: Address) -> WalletResult<U256> {
        self.read("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, Some(BlockNumber::Latest.into()))
                .await
        })
        .await
    }

    async fn send_raw_transaction(&self, signed: Bytes) -> WalletResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(signed)
            .await
            .map_err(map_provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn get_transaction_receipt(&self, hash: H256) -> WalletResult<Option<TransactionReceipt>> {
        self.read("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(hash).await
        })
        .await
    }

    async fn get_transaction_by_hash(&self, hash: H256) -> WalletResult<Transaction> {
        let result = self
            .http()
            .get_transaction(hash)
            .await
            .map_err(|e| match map_provider_error(e) {
                WalletError::Decode(_) => RemoteError::ResultParse.into(),
                other => other,
            })?;

        // A null result cannot be parsed into a transaction
        result.ok_or_else(|| RemoteError::ResultParse.into())
    }

    async fn estimate_gas(&self, tx: TypedTransaction) -> WalletResult<U256> {
        self.read("eth_estimateGas", |p| {
            let tx = tx.clone();
            async move { p.estimate_gas(&tx, None).await }
        })
        .await
    }
}

#[async_trait]
impl RateSource for ChainProvider {
    async fn expected_rate(
        &self,
        source: Address,
        dest: Address,
        amount: U256,
    ) -> WalletResult<(U256, U256)> {
        let data = encode_get_expected_rate(source, dest, amount);
        let result = self.eth_call(self.network_address, data).await?;
        decode_expected_rate(&result)
    }
}
