//! Denormalization Maintainer
//!
//! Applies a first-hop transition and propagates it to the second-hop
//! ref-counted collections: every entity linked on a related side of the same
//! policy gains or loses one reference to the transitioning entity.

use crate::context::MutationContext;
use crate::error::{PolicyError, Result};
use crate::transition::Transition;
use overlay_core::{CoreError, DenormCollection, EntityType, LinkKey, Policy, WriteTx};
use tracing::{debug, error, trace};

impl<'a, T: WriteTx + ?Sized> MutationContext<'a, T> {
    /// Flip one first-hop link and cascade to the second hop
    ///
    /// Returns `false` without touching any count when the link was already in
    /// the requested state.
    pub(crate) fn apply_transition(
        &mut self,
        policy: &Policy,
        side: EntityType,
        entity_id: &str,
        transition: Transition,
    ) -> Result<bool> {
        let key = LinkKey::new(policy.policy_type, side);
        let changed = match transition {
            Transition::Matched => self.tx.add_link(key, &policy.id, entity_id)?,
            Transition::Unmatched => self.tx.remove_link(key, &policy.id, entity_id)?,
        };
        if !changed {
            return Ok(false);
        }

        match transition {
            Transition::Matched => self.stats.matched += 1,
            Transition::Unmatched => self.stats.unmatched += 1,
        }
        debug!(policy = %policy.id, link = %key, entity = %entity_id, ?transition, "first-hop link changed");

        for related in policy.policy_type.related_sides(side) {
            let Some(collection) =
                DenormCollection::select(policy.policy_type, policy.kind, side, *related)
            else {
                continue;
            };

            let partners = self
                .tx
                .linked_entities(LinkKey::new(policy.policy_type, *related), &policy.id);
            for partner in &partners {
                let (source_id, target_id) = if collection.source() == side {
                    (entity_id, partner.as_str())
                } else {
                    (partner.as_str(), entity_id)
                };
                match transition {
                    Transition::Matched => self.increment(collection, source_id, target_id)?,
                    Transition::Unmatched => self.decrement(collection, source_id, target_id)?,
                }
            }
        }
        Ok(true)
    }

    fn increment(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<()> {
        let count = self.tx.increment_ref(collection, source_id, target_id)?;
        self.stats.increments += 1;
        trace!(%collection, source = %source_id, target = %target_id, count, "ref count incremented");

        if count == 1 {
            self.events
                .count_crossed_zero(&*self.tx, collection, source_id, target_id, true);
        }
        Ok(())
    }

    fn decrement(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<()> {
        match self.tx.decrement_ref(collection, source_id, target_id) {
            Ok(count) => {
                self.stats.decrements += 1;
                trace!(%collection, source = %source_id, target = %target_id, count, "ref count decremented");
                if count == 0 {
                    self.events
                        .count_crossed_zero(&*self.tx, collection, source_id, target_id, false);
                }
                Ok(())
            }
            Err(CoreError::InvalidRefCount { .. }) if !self.strict => {
                error!(
                    %collection,
                    source = %source_id,
                    target = %target_id,
                    "ref count would go negative, clamping at zero"
                );
                self.stats.clamped += 1;
                Ok(())
            }
            Err(CoreError::InvalidRefCount { .. }) => Err(PolicyError::NegativeRefCount {
                collection: collection.name().to_string(),
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{MutationContext, TxContext};
    use crate::error::{PolicyError, Result};
    use crate::events::ServiceEventType;
    use crate::hooks::TagChangeHooks;
    use crate::metrics::MutationStats;
    use overlay_core::{
        DenormCollection, EntityType, MemoryStore, Policy, PolicyKind, PolicyType,
        TaggedEntity, TransactionalStore,
    };

    fn run<R>(
        store: &MemoryStore,
        strict: bool,
        f: impl FnOnce(&mut TxContext<'_>) -> Result<R>,
    ) -> Result<R> {
        let hooks = TagChangeHooks::standard();
        store.update(|tx| {
            let mut ctx: TxContext<'_> = MutationContext::new(tx, &hooks, strict);
            f(&mut ctx)
        })
    }

    fn seed(store: &MemoryStore) {
        run(store, true, |ctx| {
            ctx.create_entity(EntityType::Identity, TaggedEntity::with_id("i1", "alice"))?;
            ctx.create_entity(EntityType::Service, TaggedEntity::with_id("s1", "web"))?;
            ctx.create_entity(EntityType::PostureCheck, TaggedEntity::with_id("pc1", "os"))?;
            ctx.create_policy(
                Policy::with_id(PolicyType::Service, "p1", "bind-web")
                    .with_kind(PolicyKind::Bind)
                    .with_roles(EntityType::Identity, ["@i1"])
                    .with_roles(EntityType::Service, ["@s1"])
                    .with_roles(EntityType::PostureCheck, ["@pc1"]),
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_service_side_feeds_identity_and_posture_collections() {
        let store = MemoryStore::new();
        seed(&store);

        let counts = store
            .view(|tx| {
                Ok::<_, PolicyError>((
                    tx.ref_counts(DenormCollection::IdentityServiceBind, "i1", "s1"),
                    tx.ref_counts(DenormCollection::PostureCheckServiceBind, "pc1", "s1"),
                    tx.ref_counts(DenormCollection::IdentityServiceDial, "i1", "s1"),
                ))
            })
            .unwrap();
        assert_eq!(counts.0, (Some(1), Some(1)));
        assert_eq!(counts.1, (Some(1), Some(1)));
        assert_eq!(counts.2, (None, None));
    }

    #[test]
    fn test_bind_events_on_zero_crossings() {
        let store = MemoryStore::new();
        seed(&store);

        let events = run(&store, true, |ctx| {
            ctx.delete_entity(EntityType::Identity, "i1")?;
            Ok(ctx.events().to_vec())
        })
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, ServiceEventType::BindAccessLost);
    }

    #[test]
    fn test_negative_count_strict_vs_clamped() {
        let store = MemoryStore::new();
        seed(&store);
        store.set_source_side_count(DenormCollection::IdentityServiceBind, "i1", "s1", None);

        let err = run(&store, true, |ctx| ctx.delete_entity(EntityType::Identity, "i1")).unwrap_err();
        assert!(matches!(err, PolicyError::NegativeRefCount { .. }));
        assert_eq!(store.entity_count(EntityType::Identity), 1);

        let stats: MutationStats = run(&store, false, |ctx| {
            ctx.delete_entity(EntityType::Identity, "i1")?;
            Ok(ctx.stats())
        })
        .unwrap();
        assert_eq!(stats.clamped, 1);
        assert_eq!(store.entity_count(EntityType::Identity), 0);
    }
}
