//! Local transaction state
//!
//! Handles:
//! - Transaction records and their one-way state machine
//! - The transaction store contract consumed by the trackers
//! - An in-memory store implementation

mod record;
mod store;

pub use record::{LocalizedOperation, TransactionRecord, TransactionState};
pub use store::{InMemoryTransactionStore, TransactionStats, TransactionStore};

#[cfg(test)]
pub(crate) use record::fixtures;
