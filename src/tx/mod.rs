//! Transaction construction and submission: gas prices, rate quotes,
//! draft preparation, nonce management and sending

pub mod draft;
pub mod gas;
mod nonce;
mod preparer;
mod rate;
mod sender;
pub mod token;

pub use draft::{DraftOverrides, DraftTransaction, TransactionKind};
pub use gas::{GasPriceCache, GasPriceFeed, GasTier, GasTiers, HttpGasPriceFeed};
pub use nonce::NonceManager;
pub use preparer::{GasLimits, Preparation, TransactionPreparer};
pub use rate::{RateQuote, RateQuoteClient};
pub use sender::TransactionSender;
pub use token::Token;
