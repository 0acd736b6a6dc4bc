//! # Overlay Core
//!
//! Shared types, store traits, and error handling for the overlay control plane.
//! The policy engine consumes the store only through the traits defined here, so
//! any transactional indexed store can back it. [`MemoryStore`] is the in-process
//! implementation used by tests, benches and embedders.

pub mod types;
pub mod traits;
pub mod error;
pub mod memory;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use memory::MemoryStore;
pub use traits::{CommitHook, ReadTx, TransactionalStore, WriteTx};
pub use types::{
    DenormCollection, EntityId, EntityType, LinkKey, Policy, PolicyKind, PolicyType, Semantic,
    TaggedEntity,
};
