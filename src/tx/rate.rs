//! Exchange rate quotes normalized to destination token precision

use super::token::{Token, MAX_DECIMALS};
use crate::chain::RateSource;
use crate::error::{WalletError, WalletResult};

use ethers::types::U256;
use std::sync::Arc;
use tracing::{debug, warn};

/// Same-asset slippage, as a percentage of parity
const SAME_ASSET_SLIPPAGE_PERCENT: u64 = 97;

/// Expected and worst-case rate for one unit of the source token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuote {
    pub expected: U256,
    pub slippage: U256,
}

pub struct RateQuoteClient {
    source: Arc<dyn RateSource>,
}

impl RateQuoteClient {
    pub fn new(source: Arc<dyn RateSource>) -> Self {
        Self { source }
    }

    /// Quote `from` -> `to` for `amount` base units of `from`.
    ///
    /// Same-asset quotes never touch the network. Every failure of the
    /// on-chain query is reported as [`WalletError::RateUnavailable`].
    pub async fn quote(&self, from: &Token, to: &Token, amount: U256) -> WalletResult<RateQuote> {
        check_decimals(from)?;
        check_decimals(to)?;

        if from.address == to.address {
            let parity = from.unit();
            return Ok(RateQuote {
                expected: parity,
                slippage: parity * U256::from(SAME_ASSET_SLIPPAGE_PERCENT) / U256::from(100u64),
            });
        }

        let (expected, slippage) = self
            .source
            .expected_rate(from.address, to.address, amount)
            .await
            .map_err(|e| {
                warn!("Rate query {} -> {} failed: {}", from.symbol, to.symbol, e);
                WalletError::RateUnavailable(format!("{} -> {}: {}", from.symbol, to.symbol, e))
            })?;

        let scale = U256::exp10((MAX_DECIMALS - to.decimals) as usize);
        let quote = RateQuote {
            expected: expected / scale,
            slippage: slippage / scale,
        };
        debug!("Rate {} -> {}: {:?}", from.symbol, to.symbol, quote);
        Ok(quote)
    }
}

fn check_decimals(token: &Token) -> WalletResult<()> {
    if token.decimals > MAX_DECIMALS {
        return Err(WalletError::InvalidToken {
            symbol: token.symbol.clone(),
            message: format!("{} decimals exceeds {}", token.decimals, MAX_DECIMALS),
        });
    }
    Ok(())
}
