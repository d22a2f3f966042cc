//! Snapshot-isolated transactions.
//!
//! Every transaction reads as of the snapshot that was visible when it
//! began. Commits validate that nothing the transaction touched has been
//! committed since, take per-object locks, and publish new versions under a
//! fresh snapshot id.

mod backoff;
mod manager;
mod state;
mod txn;

pub(crate) use manager::TransactionManager;
pub use state::{TransactOutcome, TransactionState};
pub use txn::Transaction;
