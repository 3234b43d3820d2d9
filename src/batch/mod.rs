//! Bounded batch writes
//!
//! Unbounded write sets are split into groups no larger than the store's
//! per-commit cap and committed in order.

mod writer;

pub use writer::{BatchReport, BatchWriter, WriteAction};
