//! Transaction preparation: gas limit, balance and rate lookups joined into one decision

use super::draft::{DraftOverrides, DraftTransaction, TransactionKind};
use super::gas::{GasPriceCache, GasTier};
use super::rate::RateQuoteClient;
use super::token::Token;
use crate::chain::RpcClient;
use crate::config::GasConfig;
use crate::error::{WalletError, WalletResult};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful preparation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preparation {
    /// Draft with fresh gas limit, price and (for swaps) rates
    Ready(DraftTransaction),
    /// Validation succeeded but the wallet cannot afford the amount
    InsufficientFunds { balance: U256, required: U256 },
}

impl Preparation {
    fn label(&self) -> &'static str {
        match self {
            Preparation::Ready(_) => "ready",
            Preparation::InsufficientFunds { .. } => "insufficient_funds",
        }
    }
}

/// Gas limits used when the draft has none and estimation is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimits {
    pub eth_transfer: U256,
    pub token_transfer: U256,
    pub swap: U256,
}

impl From<&GasConfig> for GasLimits {
    fn from(config: &GasConfig) -> Self {
        Self {
            eth_transfer: U256::from(config.transfer_eth_gas_limit),
            token_transfer: U256::from(config.transfer_token_gas_limit),
            swap: U256::from(config.swap_gas_limit),
        }
    }
}

impl GasLimits {
    fn for_draft(&self, draft: &DraftTransaction) -> U256 {
        match draft.kind {
            TransactionKind::Swap { .. } => self.swap,
            TransactionKind::Transfer { .. } if draft.from_token.is_eth() => self.eth_transfer,
            TransactionKind::Transfer { .. } => self.token_transfer,
        }
    }
}

pub struct TransactionPreparer {
    rpc: Arc<dyn RpcClient>,
    rates: Arc<RateQuoteClient>,
    gas: Arc<GasPriceCache>,
    wallet: Address,
    network: Address,
    limits: GasLimits,
}

impl TransactionPreparer {
    pub fn new(
        rpc: Arc<dyn RpcClient>,
        rates: Arc<RateQuoteClient>,
        gas: Arc<GasPriceCache>,
        wallet: Address,
        network: Address,
        limits: GasLimits,
    ) -> Self {
        Self {
            rpc,
            rates,
            gas,
            wallet,
            network,
            limits,
        }
    }

    /// Validate a swap draft.
    ///
    /// Gas limit, balance and expected rate are fetched concurrently and the
    /// decision waits for all three. A balance error wins over a rate error;
    /// an unaffordable amount is reported before a rate error; gas limit
    /// errors never fail the preparation.
    pub async fn prepare_swap(&self, draft: &DraftTransaction) -> WalletResult<Preparation> {
        let to_token = draft.to_token().cloned().ok_or_else(|| {
            WalletError::Transaction("prepare_swap called with a transfer draft".to_string())
        })?;

        let (gas_limit, balance, quote) = tokio::join!(
            self.estimate_gas_limit(draft),
            self.balance_of(&draft.from_token),
            self.rates.quote(&draft.from_token, &to_token, draft.amount),
        );

        let result = async {
            let balance = balance?;
            if balance < draft.amount {
                return Ok(Preparation::InsufficientFunds {
                    balance,
                    required: draft.amount,
                });
            }
            let quote = quote?;

            self.finish(
                draft,
                gas_limit,
                DraftOverrides {
                    expected_rate: Some(quote.expected),
                    slippage_rate: Some(quote.slippage),
                    ..Default::default()
                },
            )
            .await
        }
        .await;

        record_outcome(draft, &result);
        result
    }

    /// Validate a transfer draft: gas limit and balance, fetched concurrently
    pub async fn prepare_transfer(&self, draft: &DraftTransaction) -> WalletResult<Preparation> {
        if draft.is_swap() {
            return Err(WalletError::Transaction(
                "prepare_transfer called with a swap draft".to_string(),
            ));
        }

        let (gas_limit, balance) = tokio::join!(
            self.estimate_gas_limit(draft),
            self.balance_of(&draft.from_token),
        );

        let result = async {
            let balance = balance?;
            if balance < draft.amount {
                return Ok(Preparation::InsufficientFunds {
                    balance,
                    required: draft.amount,
                });
            }

            self.finish(draft, gas_limit, DraftOverrides::default()).await
        }
        .await;

        record_outcome(draft, &result);
        result
    }

    /// Apply the fetched gas limit and fill a missing gas price from the cache
    async fn finish(
        &self,
        draft: &DraftTransaction,
        estimated: Option<U256>,
        mut overrides: DraftOverrides,
    ) -> WalletResult<Preparation> {
        let gas_limit = estimated
            .or(draft.gas_limit)
            .unwrap_or_else(|| self.limits.for_draft(draft));
        overrides.gas_limit = Some(gas_limit);

        if draft.gas_price.is_none() {
            overrides.gas_price = Some(self.gas.price(GasTier::Standard).await);
        }

        let prepared = draft.copy_with_overrides(overrides);
        debug!(
            "Prepared {} of {} {}: gas {} fee {:?}",
            prepared.kind_label(),
            prepared.amount,
            prepared.from_token.symbol,
            gas_limit,
            prepared.fee()
        );
        Ok(Preparation::Ready(prepared))
    }

    /// Node gas estimate; failures are tolerated and yield `None`
    async fn estimate_gas_limit(&self, draft: &DraftTransaction) -> Option<U256> {
        let tx = draft.to_typed_transaction(self.wallet, self.network);
        match self.rpc.estimate_gas(tx).await {
            Ok(limit) => Some(limit),
            Err(e) => {
                warn!(
                    "Gas limit estimate for {} unavailable, keeping current limit: {}",
                    draft.kind_label(),
                    e
                );
                None
            }
        }
    }

    async fn balance_of(&self, token: &Token) -> WalletResult<U256> {
        if token.is_eth() {
            self.rpc.get_balance(self.wallet).await
        } else {
            self.rpc.get_token_balance(self.wallet, token.address).await
        }
    }
}

fn record_outcome(draft: &DraftTransaction, result: &WalletResult<Preparation>) {
    let outcome = match result {
        Ok(preparation) => preparation.label(),
        Err(e) => e.kind(),
    };
    info!("{} preparation finished: {}", draft.kind_label(), outcome);
    crate::metrics::record_preparation(draft.kind_label(), outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockRateSource, MockRpcClient};
    use crate::config::gwei;
    use crate::events::EventBus;
    use crate::tx::gas::MockGasPriceFeed;

    const WALLET_BYTE: u8 = 0x11;

    fn knc() -> Token {
        Token::new("KNC", Address::repeat_byte(0x4e), 18)
    }

    fn preparer(rpc: MockRpcClient, rates: MockRateSource) -> TransactionPreparer {
        let config = GasConfig::default();
        let gas = GasPriceCache::new(Arc::new(MockGasPriceFeed::new()), &config, EventBus::new());
        TransactionPreparer::new(
            Arc::new(rpc),
            Arc::new(RateQuoteClient::new(Arc::new(rates))),
            Arc::new(gas),
            Address::repeat_byte(WALLET_BYTE),
            Address::repeat_byte(0x99),
            GasLimits::from(&config),
        )
    }

    fn rpc_with(
        balance: WalletResult<U256>,
        estimate: WalletResult<U256>,
    ) -> MockRpcClient {
        let mut rpc = MockRpcClient::new();
        rpc.expect_get_balance()
            .times(1)
            .return_once(move |_| balance);
        rpc.expect_estimate_gas()
            .times(1)
            .return_once(move |_| estimate);
        rpc
    }

    fn rates_with(result: WalletResult<(U256, U256)>) -> MockRateSource {
        let mut rates = MockRateSource::new();
        rates
            .expect_expected_rate()
            .times(1)
            .return_once(move |_, _, _| result);
        rates
    }

    fn eth_swap(amount: u64) -> DraftTransaction {
        DraftTransaction::swap(Token::eth(), knc(), U256::from(amount))
    }

    #[tokio::test]
    async fn test_insufficient_funds_regardless_of_other_failures() {
        let preparer = preparer(
            rpc_with(
                Ok(U256::from(100u64)),
                Err(WalletError::Network("estimator down".into())),
            ),
            rates_with(Err(WalletError::Network("timeout".into()))),
        );

        let result = preparer.prepare_swap(&eth_swap(150)).await.unwrap();
        assert_eq!(
            result,
            Preparation::InsufficientFunds {
                balance: U256::from(100u64),
                required: U256::from(150u64),
            }
        );
    }

    #[tokio::test]
    async fn test_gas_estimate_failure_keeps_supplied_limit() {
        let preparer = preparer(
            rpc_with(
                Ok(U256::from(1_000u64)),
                Err(WalletError::Network("estimator down".into())),
            ),
            rates_with(Ok((U256::exp10(18), U256::exp10(17)))),
        );
        let draft = eth_swap(150).copy_with_overrides(DraftOverrides {
            gas_limit: Some(U256::from(400_000u64)),
            ..Default::default()
        });

        let Preparation::Ready(prepared) = preparer.prepare_swap(&draft).await.unwrap() else {
            panic!("expected a ready draft");
        };
        assert_eq!(prepared.gas_limit, Some(U256::from(400_000u64)));
        assert_eq!(prepared.expected_rate, Some(U256::exp10(18)));
        assert_eq!(prepared.slippage_rate, Some(U256::exp10(17)));
        assert_eq!(prepared.amount, draft.amount);
    }

    #[tokio::test]
    async fn test_gas_estimate_failure_falls_back_to_default_limit() {
        let preparer = preparer(
            rpc_with(
                Ok(U256::from(1_000u64)),
                Err(WalletError::Decode("bad estimate".into())),
            ),
            rates_with(Ok((U256::exp10(18), U256::exp10(17)))),
        );

        let Preparation::Ready(prepared) = preparer.prepare_swap(&eth_swap(10)).await.unwrap() else {
            panic!("expected a ready draft");
        };
        assert_eq!(prepared.gas_limit, Some(U256::from(660_000u64)));
        assert_eq!(prepared.gas_price, Some(gwei(10)));
    }

    #[tokio::test]
    async fn test_balance_failure_is_fatal() {
        let preparer = preparer(
            rpc_with(
                Err(WalletError::Network("connection reset".into())),
                Ok(U256::from(200_000u64)),
            ),
            rates_with(Ok((U256::exp10(18), U256::exp10(17)))),
        );

        let err = preparer.prepare_swap(&eth_swap(10)).await.unwrap_err();
        assert!(matches!(err, WalletError::Network(_)));
    }

    #[tokio::test]
    async fn test_balance_error_wins_over_rate_error() {
        let preparer = preparer(
            rpc_with(
                Err(WalletError::Decode("bad balance".into())),
                Ok(U256::from(200_000u64)),
            ),
            rates_with(Err(WalletError::Network("timeout".into()))),
        );

        let err = preparer.prepare_swap(&eth_swap(10)).await.unwrap_err();
        assert!(matches!(err, WalletError::Decode(_)));
    }

    #[tokio::test]
    async fn test_rate_failure_is_fatal_when_affordable() {
        let preparer = preparer(
            rpc_with(Ok(U256::from(1_000u64)), Ok(U256::from(200_000u64))),
            rates_with(Err(WalletError::Network("timeout".into()))),
        );

        let err = preparer.prepare_swap(&eth_swap(10)).await.unwrap_err();
        assert!(matches!(err, WalletError::RateUnavailable(_)));
    }

    #[tokio::test]
    async fn test_token_transfer_overrides_only_gas_limit() {
        let mut rpc = MockRpcClient::new();
        rpc.expect_get_token_balance()
            .withf(|wallet, contract| {
                *wallet == Address::repeat_byte(WALLET_BYTE) && *contract == knc().address
            })
            .times(1)
            .returning(|_, _| Ok(U256::from(500u64)));
        rpc.expect_estimate_gas()
            .times(1)
            .returning(|_| Ok(U256::from(52_000u64)));
        let preparer = preparer(rpc, MockRateSource::new());

        let recipient = Address::repeat_byte(0x22);
        let draft = DraftTransaction::transfer(knc(), recipient, U256::from(500u64))
            .copy_with_overrides(DraftOverrides {
                gas_price: Some(gwei(33)),
                nonce: Some(U256::from(7u64)),
                ..Default::default()
            });

        let Preparation::Ready(prepared) = preparer.prepare_transfer(&draft).await.unwrap() else {
            panic!("expected a ready draft");
        };
        assert_eq!(prepared.gas_limit, Some(U256::from(52_000u64)));
        assert_eq!(prepared.gas_price, Some(gwei(33)));
        assert_eq!(prepared.nonce, Some(U256::from(7u64)));
        assert_eq!(prepared.kind, TransactionKind::Transfer { recipient });
        assert_eq!(prepared.expected_rate, None);
    }

    #[tokio::test]
    async fn test_eth_transfer_falls_back_to_eth_limit() {
        let preparer = preparer(
            rpc_with(
                Ok(U256::from(1_000u64)),
                Err(WalletError::Network("estimator down".into())),
            ),
            MockRateSource::new(),
        );
        let draft = DraftTransaction::transfer(Token::eth(), Address::repeat_byte(0x22), U256::from(10u64));

        let Preparation::Ready(prepared) = preparer.prepare_transfer(&draft).await.unwrap() else {
            panic!("expected a ready draft");
        };
        assert_eq!(prepared.gas_limit, Some(U256::from(21_000u64)));
        assert_eq!(prepared.gas_price, Some(gwei(10)));
    }

    #[tokio::test]
    async fn test_token_transfer_falls_back_to_token_limit() {
        let mut rpc = MockRpcClient::new();
        rpc.expect_get_token_balance()
            .times(1)
            .returning(|_, _| Ok(U256::from(500u64)));
        rpc.expect_estimate_gas()
            .times(1)
            .returning(|_| Err(WalletError::Decode("bad estimate".into())));
        let preparer = preparer(rpc, MockRateSource::new());
        let draft = DraftTransaction::transfer(knc(), Address::repeat_byte(0x22), U256::from(500u64));

        let Preparation::Ready(prepared) = preparer.prepare_transfer(&draft).await.unwrap() else {
            panic!("expected a ready draft");
        };
        assert_eq!(prepared.gas_limit, Some(U256::from(60_000u64)));
    }

    #[tokio::test]
    async fn test_transfer_balance_failure_is_fatal() {
        let preparer = preparer(
            rpc_with(
                Err(WalletError::Network("connection reset".into())),
                Ok(U256::from(21_000u64)),
            ),
            MockRateSource::new(),
        );
        let draft = DraftTransaction::transfer(Token::eth(), Address::repeat_byte(0x22), U256::from(10u64));

        let err = preparer.prepare_transfer(&draft).await.unwrap_err();
        assert!(matches!(err, WalletError::Network(_)));
    }

    #[tokio::test]
    async fn test_transfer_insufficient_funds_despite_estimate_failure() {
        let preparer = preparer(
            rpc_with(
                Ok(U256::from(5u64)),
                Err(WalletError::Network("estimator down".into())),
            ),
            MockRateSource::new(),
        );
        let draft = DraftTransaction::transfer(Token::eth(), Address::repeat_byte(0x22), U256::from(10u64));

        let result = preparer.prepare_transfer(&draft).await.unwrap();
        assert_eq!(
            result,
            Preparation::InsufficientFunds {
                balance: U256::from(5u64),
                required: U256::from(10u64),
            }
        );
    }

    #[tokio::test]
    async fn test_rejects_mismatched_draft_kind() {
        let preparer = preparer(MockRpcClient::new(), MockRateSource::new());
        let transfer = DraftTransaction::transfer(Token::eth(), Address::zero(), U256::one());

        assert!(matches!(
            preparer.prepare_swap(&transfer).await,
            Err(WalletError::Transaction(_))
        ));
        assert!(matches!(
            preparer.prepare_transfer(&eth_swap(1)).await,
            Err(WalletError::Transaction(_))
        ));
    }
}
