//! Call data encoding and decoding for the exchange network and ERC-20 contracts

use crate::error::{WalletError, WalletResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use sha3::{Digest, Keccak256};

pub const GET_EXPECTED_RATE: &str = "getExpectedRate(address,address,uint256)";
pub const TRADE: &str = "trade(address,uint256,address,address,uint256,uint256,address)";
pub const TRANSFER: &str = "transfer(address,uint256)";
pub const BALANCE_OF: &str = "balanceOf(address)";

/// First four bytes of keccak256 of the function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&abi::encode(args));
    data.into()
}

pub fn encode_get_expected_rate(source: Address, dest: Address, amount: U256) -> Bytes {
    encode_call(
        GET_EXPECTED_RATE,
        &[Token::Address(source), Token::Address(dest), Token::Uint(amount)],
    )
}

/// Decode the `(expectedRate, slippageRate)` pair returned by `getExpectedRate`
pub fn decode_expected_rate(data: &[u8]) -> WalletResult<(U256, U256)> {
    let tokens = abi::decode(&[ParamType::Uint(256), ParamType::Uint(256)], data)
        .map_err(|e| WalletError::Decode(format!("getExpectedRate result: {}", e)))?;

    match tokens.as_slice() {
        [Token::Uint(expected), Token::Uint(slippage)] => Ok((*expected, *slippage)),
        _ => Err(WalletError::Decode(
            "getExpectedRate result has unexpected shape".to_string(),
        )),
    }
}

/// Parameters of a `trade` call on the exchange network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeCall {
    pub source: Address,
    pub source_amount: U256,
    pub dest: Address,
    pub dest_address: Address,
    pub max_dest_amount: U256,
    pub min_conversion_rate: U256,
    pub wallet_id: Address,
}

pub fn encode_trade(call: &TradeCall) -> Bytes {
    encode_call(
        TRADE,
        &[
            Token::Address(call.source),
            Token::Uint(call.source_amount),
            Token::Address(call.dest),
            Token::Address(call.dest_address),
            Token::Uint(call.max_dest_amount),
            Token::Uint(call.min_conversion_rate),
            Token::Address(call.wallet_id),
        ],
    )
}

pub fn encode_transfer(to: Address, amount: U256) -> Bytes {
    encode_call(TRANSFER, &[Token::Address(to), Token::Uint(amount)])
}

pub fn encode_balance_of(owner: Address) -> Bytes {
    encode_call(BALANCE_OF, &[Token::Address(owner)])
}

pub fn decode_uint(data: &[u8]) -> WalletResult<U256> {
    let tokens = abi::decode(&[ParamType::Uint(256)], data)
        .map_err(|e| WalletError::Decode(format!("uint256 result: {}", e)))?;

    match tokens.as_slice() {
        [Token::Uint(value)] => Ok(*value),
        _ => Err(WalletError::Decode("uint256 result has unexpected shape".to_string())),
    }
}
