//! Policy engine facade
//!
//! Owns the store handle, tag-change hooks, metrics and event dispatcher, and
//! runs every mutation in its own write transaction.
//!
//! ```text
//! mutation → MutationContext ─→ Transition Processor → Denormalization Maintainer
//!                 │                                          │
//!                 └──────── one write transaction ───────────┘
//!                                     ↓ commit
//!                          [Metrics]  [EventDispatcher]
//! ```

use crate::config::EngineConfig;
use crate::context::{MutationContext, TxContext};
use crate::error::{PolicyError, Result};
use crate::events::{EventDispatcher, ServiceEvent};
use crate::hooks::TagChangeHooks;
use crate::integrity::{audit, audit_and_repair, Discrepancy, IntegrityReport};
use crate::metrics::{EngineMetrics, MetricsCollector};
use overlay_core::{
    DenormCollection, EntityId, EntityType, Policy, PolicyType, TaggedEntity, TransactionalStore,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::info;

/// Result of a committed mutation with the service events it produced
#[derive(Debug, Clone)]
pub struct Committed<R> {
    pub value: R,
    pub events: Vec<ServiceEvent>,
}

/// Role-attribute policy engine over a transactional store
pub struct PolicyEngine<S: TransactionalStore> {
    store: Arc<S>,
    hooks: TagChangeHooks,
    config: EngineConfig,
    metrics: Option<Arc<MetricsCollector>>,
    dispatcher: Option<EventDispatcher>,
}

impl<S: TransactionalStore> PolicyEngine<S> {
    /// Create an engine with the standard tag-change bindings
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        Self::with_hooks(store, config, TagChangeHooks::standard())
    }

    /// Create an engine that re-evaluates only the policy types bound in `hooks`
    pub fn with_hooks(store: Arc<S>, config: EngineConfig, hooks: TagChangeHooks) -> Result<Self> {
        config.validate()?;

        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        info!(
            strict_ref_counts = config.strict_ref_counts,
            metrics = config.enable_metrics,
            "PolicyEngine initialized"
        );

        Ok(Self {
            store,
            hooks,
            config,
            metrics,
            dispatcher: None,
        })
    }

    /// Publish committed service events on a broadcast channel
    pub fn with_dispatcher(mut self) -> Self {
        self.dispatcher = Some(EventDispatcher::new(self.config.event_channel_capacity));
        self
    }

    /// Subscribe to committed service events (requires a dispatcher)
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ServiceEvent>> {
        self.dispatcher.as_ref().map(EventDispatcher::subscribe)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current metrics snapshot, if metrics are enabled
    pub fn metrics(&self) -> Option<EngineMetrics> {
        self.metrics.as_ref().map(|m| m.get_metrics())
    }

    /// Metrics collector, if metrics are enabled
    pub fn metrics_collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Run `f` in a write transaction
    ///
    /// Everything done through the context commits together or not at all.
    /// Service events are returned with the value and, when a dispatcher is
    /// attached, published after the commit.
    pub fn write<R, F>(&self, f: F) -> Result<Committed<R>>
    where
        F: FnOnce(&mut TxContext<'_>) -> Result<R>,
    {
        let start = Instant::now();
        let hooks = &self.hooks;
        let strict = self.config.strict_ref_counts;
        let dispatcher = self.dispatcher.clone();

        let result = self.store.update(|tx| {
            let mut ctx: TxContext<'_> = MutationContext::new(tx, hooks, strict);
            let value = f(&mut ctx)?;

            if let Some(dispatcher) = dispatcher {
                if !ctx.events().is_empty() {
                    let events = ctx.events().to_vec();
                    ctx.on_commit(Box::new(move || {
                        dispatcher.dispatch(events);
                    }));
                }
            }

            let (events, stats) = ctx.finish();
            Ok((value, events, stats))
        });

        match result {
            Ok((value, events, stats)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_commit(&stats, start.elapsed());
                }
                Ok(Committed { value, events })
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rollback();
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // Entity and policy operations
    // ========================================================================

    pub fn create_entity(
        &self,
        entity_type: EntityType,
        entity: TaggedEntity,
    ) -> Result<Committed<TaggedEntity>> {
        self.write(|ctx| ctx.create_entity(entity_type, entity))
    }

    pub fn update_entity(
        &self,
        entity_type: EntityType,
        entity: TaggedEntity,
    ) -> Result<Committed<TaggedEntity>> {
        self.write(|ctx| ctx.update_entity(entity_type, entity))
    }

    pub fn delete_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Committed<TaggedEntity>> {
        self.write(|ctx| ctx.delete_entity(entity_type, id))
    }

    pub fn create_policy(&self, policy: Policy) -> Result<Committed<Policy>> {
        self.write(|ctx| ctx.create_policy(policy))
    }

    pub fn update_policy(&self, policy: Policy) -> Result<Committed<Policy>> {
        self.write(|ctx| ctx.update_policy(policy))
    }

    pub fn delete_policy(&self, policy_type: PolicyType, id: &str) -> Result<Committed<Policy>> {
        self.write(|ctx| ctx.delete_policy(policy_type, id))
    }

    /// Load an entity from committed state
    pub fn entity(&self, entity_type: EntityType, id: &str) -> Result<Option<TaggedEntity>> {
        self.store.view(|tx| Ok(tx.entity(entity_type, id)))
    }

    /// Load a policy from committed state
    pub fn policy(&self, policy_type: PolicyType, id: &str) -> Result<Option<Policy>> {
        self.store.view(|tx| Ok(tx.policy(policy_type, id)))
    }

    // ========================================================================
    // Access checks
    // ========================================================================

    /// Whether `source_id` is related to `target_id` in a collection
    ///
    /// Reads the stored count only; no policy is evaluated.
    pub fn check_access(
        &self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<bool> {
        let (count, _) = self
            .store
            .view(|tx| Ok::<_, PolicyError>(tx.ref_counts(collection, source_id, target_id)))?;
        let granted = count.unwrap_or(0) > 0;

        if let Some(metrics) = &self.metrics {
            metrics.record_access_check(collection, granted);
        }
        Ok(granted)
    }

    pub fn can_dial(&self, identity_id: &str, service_id: &str) -> Result<bool> {
        self.check_access(DenormCollection::IdentityServiceDial, identity_id, service_id)
    }

    pub fn can_bind(&self, identity_id: &str, service_id: &str) -> Result<bool> {
        self.check_access(DenormCollection::IdentityServiceBind, identity_id, service_id)
    }

    pub fn can_use_edge_router(&self, identity_id: &str, edge_router_id: &str) -> Result<bool> {
        self.check_access(DenormCollection::IdentityEdgeRouter, identity_id, edge_router_id)
    }

    pub fn service_on_edge_router(&self, service_id: &str, edge_router_id: &str) -> Result<bool> {
        self.check_access(DenormCollection::ServiceEdgeRouter, service_id, edge_router_id)
    }

    /// Entities related to `id` in a collection, with their counts
    pub fn related(
        &self,
        collection: DenormCollection,
        side: EntityType,
        id: &str,
    ) -> Result<Vec<(EntityId, i32)>> {
        self.store
            .view(|tx| Ok(tx.ref_partners(collection, side, id)))
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Check one policy type against ground truth
    ///
    /// Report mode runs on a read snapshot. Repair mode runs in a write
    /// transaction and rewrites every drifted link and count. `report` is called
    /// once per discrepancy, after the transaction has finished, with whether it
    /// was fixed.
    pub fn run_integrity_check<F>(
        &self,
        policy_type: PolicyType,
        repair: bool,
        mut report: F,
    ) -> Result<IntegrityReport>
    where
        F: FnMut(&Discrepancy, bool),
    {
        let (result, fixed) = if repair {
            self.store.update(|tx| audit_and_repair(tx, policy_type))?
        } else {
            let result = self.store.view(|tx| audit(tx, policy_type))?;
            let fixed = vec![false; result.discrepancies.len()];
            (result, fixed)
        };

        for (discrepancy, was_fixed) in result.discrepancies.iter().zip(fixed) {
            report(discrepancy, was_fixed);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_integrity_run(result.discrepancies.len(), result.fixed);
        }

        info!(
            policy_type = %policy_type,
            repair,
            links = result.links_checked,
            pairs = result.pairs_checked,
            discrepancies = result.discrepancies.len(),
            fixed = result.fixed,
            "integrity check finished"
        );
        Ok(result)
    }

    /// Check every policy type
    pub fn run_full_integrity_check<F>(
        &self,
        repair: bool,
        mut report: F,
    ) -> Result<Vec<IntegrityReport>>
    where
        F: FnMut(&Discrepancy, bool),
    {
        PolicyType::ALL
            .iter()
            .map(|policy_type| self.run_integrity_check(*policy_type, repair, &mut report))
            .collect()
    }
}
