//! Wallet transaction core
//!
//! Keeps gas prices fresh, validates swap and transfer drafts against the
//! wallet's balance and the exchange network's rates, submits signed
//! transactions and follows them until they are mined, failed or dropped.

pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod schedule;
pub mod state;
pub mod tracking;
pub mod tx;
pub mod wallet;

pub use error::{WalletError, WalletResult};
pub use events::{EventBus, WalletEvent};
pub use wallet::{Collaborators, WalletCore};
