//! Shared traits for the overlay control plane

pub mod store;

// Re-export commonly used traits
pub use store::{CommitHook, ReadTx, TransactionalStore, WriteTx};
