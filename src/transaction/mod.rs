//! Transactions
//!
//! `Repository::run_in_transaction` gives a callback a `TransactionContext`
//! whose writes are deferred until the callback returns, which keeps every
//! read ahead of every write no matter how the callback interleaves them.

mod context;
mod coordinator;

pub use context::{TransactionContext, WriteKind};
