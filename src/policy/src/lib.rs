//! # Overlay Policy
//!
//! Role-attribute policy matching and denormalized relationship maintenance for
//! the overlay control plane.
//!
//! ## Architecture
//!
//! - **Classifier** ([`roles`]): splits role sets into `#tag`, `@id` and `all`
//! - **Evaluator** ([`semantic`]): the AllOf/AnyOf match predicate
//! - **Resolver** ([`resolver`]): normalizes role sets and resolves match sets
//! - **Transitions**: flip first-hop policy <-> entity links
//! - **Denormalization**: keep second-hop ref counts in step with the links
//! - **Cleanup**: strip references to deleted entities
//! - **Integrity** ([`integrity`]): brute-force audit and repair
//!
//! All maintenance for one mutation runs inside a single write transaction of
//! the backing [`overlay_core::TransactionalStore`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use overlay_core::{EntityType, MemoryStore, Policy, PolicyType, TaggedEntity};
//! use overlay_policy::{EngineConfig, PolicyEngine};
//! use std::sync::Arc;
//!
//! # fn main() -> overlay_policy::Result<()> {
//! let engine = PolicyEngine::new(Arc::new(MemoryStore::new()), EngineConfig::default())?;
//!
//! let alice = engine
//!     .create_entity(EntityType::Identity, TaggedEntity::new("alice").with_roles(["eng"]))?
//!     .value;
//! let web = engine.create_entity(EntityType::Service, TaggedEntity::new("web"))?.value;
//!
//! engine.create_policy(
//!     Policy::new(PolicyType::Service, "eng-dial-web")
//!         .with_roles(EntityType::Identity, ["#eng"])
//!         .with_roles(EntityType::Service, ["@web"]),
//! )?;
//!
//! assert!(engine.can_dial(&alice.id, &web.id)?);
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod config;
pub mod context;
pub mod denorm;
pub mod engine;
pub mod error;
pub mod events;
pub mod hooks;
pub mod integrity;
pub mod metrics;
pub mod resolver;
pub mod roles;
pub mod scheduler;
pub mod semantic;
pub mod transition;

pub use config::{EngineConfig, IntegrityConfig};
pub use context::{MutationContext, TxContext};
pub use engine::{Committed, PolicyEngine};
pub use error::{PolicyError, Result};
pub use events::{EventDispatcher, ServiceEvent, ServiceEventType};
pub use hooks::{PolicyBinding, TagChangeHooks};
pub use integrity::{Discrepancy, DiscrepancyKind, IntegrityReport};
pub use metrics::{EngineMetrics, MetricsCollector, MutationStats};
pub use scheduler::IntegrityScheduler;
pub use semantic::parse_semantic;
pub use transition::Transition;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
