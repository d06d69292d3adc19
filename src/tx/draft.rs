//! Draft transactions under construction

use super::token::{Token, MAX_DECIMALS};
use crate::chain::exchange::{encode_trade, encode_transfer, TradeCall};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use serde::{Deserialize, Serialize};

/// What the draft does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Send `from_token` to a recipient
    Transfer { recipient: Address },
    /// Exchange `from_token` for `to_token` through the exchange network
    Swap { to_token: Token },
}

/// Fields the preparer may fill in; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftOverrides {
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub expected_rate: Option<U256>,
    pub slippage_rate: Option<U256>,
    pub nonce: Option<U256>,
}

/// An unsubmitted transaction. Rates are expressed in destination token precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftTransaction {
    pub kind: TransactionKind,
    pub from_token: Token,
    pub amount: U256,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub expected_rate: Option<U256>,
    pub slippage_rate: Option<U256>,
    pub nonce: Option<U256>,
}

impl DraftTransaction {
    pub fn transfer(token: Token, recipient: Address, amount: U256) -> Self {
        Self::new(TransactionKind::Transfer { recipient }, token, amount)
    }

    pub fn swap(from_token: Token, to_token: Token, amount: U256) -> Self {
        Self::new(TransactionKind::Swap { to_token }, from_token, amount)
    }

    fn new(kind: TransactionKind, from_token: Token, amount: U256) -> Self {
        Self {
            kind,
            from_token,
            amount,
            gas_limit: None,
            gas_price: None,
            expected_rate: None,
            slippage_rate: None,
            nonce: None,
        }
    }

    /// New draft with the given fields replaced; the original is left untouched
    pub fn copy_with_overrides(&self, overrides: DraftOverrides) -> Self {
        Self {
            gas_limit: overrides.gas_limit.or(self.gas_limit),
            gas_price: overrides.gas_price.or(self.gas_price),
            expected_rate: overrides.expected_rate.or(self.expected_rate),
            slippage_rate: overrides.slippage_rate.or(self.slippage_rate),
            nonce: overrides.nonce.or(self.nonce),
            ..self.clone()
        }
    }

    pub fn is_swap(&self) -> bool {
        matches!(self.kind, TransactionKind::Swap { .. })
    }

    pub fn to_token(&self) -> Option<&Token> {
        match &self.kind {
            TransactionKind::Swap { to_token } => Some(to_token),
            TransactionKind::Transfer { .. } => None,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            TransactionKind::Transfer { .. } => "transfer",
            TransactionKind::Swap { .. } => "swap",
        }
    }

    /// gasLimit × gasPrice, once both are known
    pub fn fee(&self) -> Option<U256> {
        Some(self.gas_limit? * self.gas_price?)
    }

    /// Address the signed transaction is sent to
    pub fn destination(&self, network: Address) -> Address {
        match &self.kind {
            TransactionKind::Transfer { recipient } if self.from_token.is_eth() => *recipient,
            TransactionKind::Transfer { .. } => self.from_token.address,
            TransactionKind::Swap { .. } => network,
        }
    }

    /// Call request for gas estimation and signing
    pub fn to_typed_transaction(&self, from: Address, network: Address) -> TypedTransaction {
        let value = if self.from_token.is_eth() {
            self.amount
        } else {
            U256::zero()
        };

        let mut request = TransactionRequest::new()
            .from(from)
            .to(self.destination(network))
            .value(value);

        match &self.kind {
            TransactionKind::Transfer { recipient } if !self.from_token.is_eth() => {
                request = request.data(encode_transfer(*recipient, self.amount));
            }
            TransactionKind::Transfer { .. } => {}
            TransactionKind::Swap { to_token } => {
                request = request.data(encode_trade(&TradeCall {
                    source: self.from_token.address,
                    source_amount: self.amount,
                    dest: to_token.address,
                    dest_address: from,
                    max_dest_amount: U256::one() << 255,
                    min_conversion_rate: self.min_conversion_rate(to_token),
                    wallet_id: Address::zero(),
                }));
            }
        }

        if let Some(gas) = self.gas_limit {
            request = request.gas(gas);
        }
        if let Some(price) = self.gas_price {
            request = request.gas_price(price);
        }
        if let Some(nonce) = self.nonce {
            request = request.nonce(nonce);
        }

        request.into()
    }

    /// Slippage rate scaled back to the contract's 18-decimal precision
    fn min_conversion_rate(&self, to_token: &Token) -> U256 {
        let scale = U256::exp10(MAX_DECIMALS.saturating_sub(to_token.decimals) as usize);
        self.slippage_rate.unwrap_or_default().saturating_mul(scale)
    }
}
