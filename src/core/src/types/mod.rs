//! Core type definitions for the overlay control plane

pub mod entity;
pub mod policy;
pub mod links;

pub use entity::{EntityId, EntityType, TaggedEntity};
pub use links::{DenormCollection, LinkKey};
pub use policy::{Policy, PolicyKind, PolicyType, Semantic};
