//! Token descriptors

use ethers::types::{Address, U256};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Pseudo-address the exchange network uses for native ETH
    pub static ref ETH_ADDRESS: Address = Address::repeat_byte(0xee);
}

/// Contract decimals are reported at this precision on-chain
pub const MAX_DECIMALS: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u32,
}

impl Token {
    pub fn new(symbol: impl Into<String>, address: Address, decimals: u32) -> Self {
        Self {
            symbol: symbol.into(),
            address,
            decimals,
        }
    }

    pub fn eth() -> Self {
        Self::new("ETH", *ETH_ADDRESS, MAX_DECIMALS)
    }

    pub fn is_eth(&self) -> bool {
        self.address == *ETH_ADDRESS
    }

    /// One whole token in base units
    pub fn unit(&self) -> U256 {
        U256::exp10(self.decimals as usize)
    }
}
