//! Error types for the wallet transaction core

use thiserror::Error;

/// Structured error returned by a remote JSON-RPC endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The node answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Response { code: i64, message: String },

    /// The node answered but the result could not be parsed (includes `null`)
    #[error("Failed to parse RPC result")]
    ResultParse,
}

/// Main error type for the wallet core
#[derive(Error, Debug, Clone)]
pub enum WalletError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Transaction store error: {0}")]
    Store(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Nonce error for {address}: {message}")]
    Nonce { address: String, message: String },

    #[error("Invalid token {symbol}: {message}")]
    InvalidToken { symbol: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Banner category shown to the user for a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMessage {
    ConnectionError,
    RateUnavailable,
    Generic,
}

impl WalletError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Network(_))
    }

    /// Map the error to the banner category displayed upstream
    pub fn user_message(&self) -> UserMessage {
        match self {
            WalletError::Network(_) => UserMessage::ConnectionError,
            WalletError::RateUnavailable(_) => UserMessage::RateUnavailable,
            _ => UserMessage::Generic,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::Config(_) => "config",
            WalletError::Network(_) => "network",
            WalletError::Decode(_) => "decode",
            WalletError::RateUnavailable(_) => "rate_unavailable",
            WalletError::Remote(_) => "remote",
            WalletError::Store(_) => "store",
            WalletError::Transaction(_) => "transaction",
            WalletError::Nonce { .. } => "nonce",
            WalletError::InvalidToken { .. } => "invalid_token",
            WalletError::Internal(_) => "internal",
        }
    }
}

/// Result type for wallet core operations
pub type WalletResult<T> = Result<T, WalletError>;
