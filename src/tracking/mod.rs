//! Background reconciliation of the local transaction store with the chain
//!
//! This module provides:
//! - Pending transaction polling with receipt and by-hash fallback
//! - History sync from a transaction indexer

mod history;
mod tracker;

pub use history::{HistorySource, HistorySync, HttpHistorySource};
pub use tracker::{PendingTransactionTracker, PollOutcome};

#[cfg(test)]
pub use history::MockHistorySource;
