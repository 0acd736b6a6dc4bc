//! Table structures backing the in-memory store

use crate::error::{CoreError, Result};
use crate::types::{
    DenormCollection, EntityId, EntityType, LinkKey, Policy, PolicyType, Semantic, TaggedEntity,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Entity rows with a unique name index and a tag (role attribute) index
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityTable {
    rows: BTreeMap<EntityId, TaggedEntity>,
    names: HashMap<String, EntityId>,
    tags: HashMap<String, BTreeSet<EntityId>>,
}

impl EntityTable {
    pub(crate) fn get(&self, id: &str) -> Option<&TaggedEntity> {
        self.rows.get(id)
    }

    pub(crate) fn ids(&self) -> Vec<EntityId> {
        self.rows.keys().cloned().collect()
    }

    pub(crate) fn id_by_name(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).cloned()
    }

    pub(crate) fn put(
        &mut self,
        entity_type: EntityType,
        entity: TaggedEntity,
    ) -> Result<Option<TaggedEntity>> {
        if let Some(owner) = self.names.get(&entity.name) {
            if owner != &entity.id {
                return Err(CoreError::name_in_use(entity_type, entity.name));
            }
        }

        let previous = self.rows.remove(&entity.id);
        if let Some(prev) = &previous {
            self.unindex(prev);
        }
        self.index(&entity);
        self.rows.insert(entity.id.clone(), entity);
        Ok(previous)
    }

    pub(crate) fn delete(&mut self, entity_type: EntityType, id: &str) -> Result<TaggedEntity> {
        let entity = self
            .rows
            .remove(id)
            .ok_or_else(|| CoreError::not_found(entity_type, id))?;
        self.unindex(&entity);
        Ok(entity)
    }

    /// Ids carrying all (AllOf) or any (AnyOf) of the tags
    pub(crate) fn matching(&self, tags: &[String], semantic: Semantic) -> Vec<EntityId> {
        if tags.is_empty() {
            return Vec::new();
        }

        match semantic {
            Semantic::AllOf => {
                let mut sets = Vec::with_capacity(tags.len());
                for tag in tags {
                    match self.tags.get(tag) {
                        Some(set) => sets.push(set),
                        None => return Vec::new(),
                    }
                }
                sets.sort_by_key(|set| set.len());
                let (smallest, rest) = sets.split_at(1);
                smallest[0]
                    .iter()
                    .filter(|id| rest.iter().all(|set| set.contains(*id)))
                    .cloned()
                    .collect()
            }
            Semantic::AnyOf => {
                let mut ids = BTreeSet::new();
                for set in tags.iter().filter_map(|tag| self.tags.get(tag)) {
                    ids.extend(set.iter().cloned());
                }
                ids.into_iter().collect()
            }
        }
    }

    fn index(&mut self, entity: &TaggedEntity) {
        self.names.insert(entity.name.clone(), entity.id.clone());
        for tag in &entity.role_attributes {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(entity.id.clone());
        }
    }

    fn unindex(&mut self, entity: &TaggedEntity) {
        if self.names.get(&entity.name) == Some(&entity.id) {
            self.names.remove(&entity.name);
        }
        for tag in &entity.role_attributes {
            if let Some(set) = self.tags.get_mut(tag) {
                set.remove(&entity.id);
                if set.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }
}

/// Policy rows with a unique name index
#[derive(Debug, Clone, Default)]
pub(crate) struct PolicyTable {
    rows: BTreeMap<EntityId, Policy>,
    names: HashMap<String, EntityId>,
}

impl PolicyTable {
    pub(crate) fn get(&self, id: &str) -> Option<&Policy> {
        self.rows.get(id)
    }

    pub(crate) fn ids(&self) -> Vec<EntityId> {
        self.rows.keys().cloned().collect()
    }

    pub(crate) fn put(&mut self, policy: Policy) -> Result<Option<Policy>> {
        if let Some(owner) = self.names.get(&policy.name) {
            if owner != &policy.id {
                return Err(CoreError::name_in_use(policy.policy_type, policy.name));
            }
        }

        let previous = self.rows.remove(&policy.id);
        if let Some(prev) = &previous {
            if self.names.get(&prev.name) == Some(&prev.id) {
                self.names.remove(&prev.name);
            }
        }
        self.names.insert(policy.name.clone(), policy.id.clone());
        self.rows.insert(policy.id.clone(), policy);
        Ok(previous)
    }

    pub(crate) fn delete(&mut self, policy_type: PolicyType, id: &str) -> Result<Policy> {
        let policy = self
            .rows
            .remove(id)
            .ok_or_else(|| CoreError::not_found(policy_type, id))?;
        if self.names.get(&policy.name) == Some(&policy.id) {
            self.names.remove(&policy.name);
        }
        Ok(policy)
    }
}

/// Bidirectional policy <-> entity link set
#[derive(Debug, Clone, Default)]
pub(crate) struct LinkTable {
    by_policy: BTreeMap<EntityId, BTreeSet<EntityId>>,
    by_entity: BTreeMap<EntityId, BTreeSet<EntityId>>,
}

impl LinkTable {
    pub(crate) fn entities(&self, policy_id: &str) -> Vec<EntityId> {
        self.by_policy
            .get(policy_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn policies(&self, entity_id: &str) -> Vec<EntityId> {
        self.by_entity
            .get(entity_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Policies holding at least one link
    pub(crate) fn policy_ids(&self) -> Vec<EntityId> {
        self.by_policy.keys().cloned().collect()
    }

    pub(crate) fn contains(&self, policy_id: &str, entity_id: &str) -> bool {
        self.by_policy
            .get(policy_id)
            .map_or(false, |set| set.contains(entity_id))
    }

    pub(crate) fn add(&mut self, policy_id: &str, entity_id: &str) -> bool {
        let added = self
            .by_policy
            .entry(policy_id.to_string())
            .or_default()
            .insert(entity_id.to_string());
        self.by_entity
            .entry(entity_id.to_string())
            .or_default()
            .insert(policy_id.to_string());
        added
    }

    pub(crate) fn remove(&mut self, policy_id: &str, entity_id: &str) -> bool {
        let removed = remove_nested(&mut self.by_policy, policy_id, entity_id);
        remove_nested(&mut self.by_entity, entity_id, policy_id);
        removed
    }
}

fn remove_nested(map: &mut BTreeMap<EntityId, BTreeSet<EntityId>>, outer: &str, inner: &str) -> bool {
    let Some(set) = map.get_mut(outer) else {
        return false;
    };
    let removed = set.remove(inner);
    if set.is_empty() {
        map.remove(outer);
    }
    removed
}

/// Ref-counted entity pairs, indexed from both the source and the target side
#[derive(Debug, Clone, Default)]
pub(crate) struct RefCountTable {
    by_source: BTreeMap<EntityId, BTreeMap<EntityId, i32>>,
    by_target: BTreeMap<EntityId, BTreeMap<EntityId, i32>>,
}

impl RefCountTable {
    pub(crate) fn counts(&self, source_id: &str, target_id: &str) -> (Option<i32>, Option<i32>) {
        (
            read_count(&self.by_source, source_id, target_id),
            read_count(&self.by_target, target_id, source_id),
        )
    }

    pub(crate) fn partners(&self, from_source: bool, id: &str) -> Vec<(EntityId, i32)> {
        let index = if from_source {
            &self.by_source
        } else {
            &self.by_target
        };
        index
            .get(id)
            .map(|partners| partners.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn pairs(&self) -> Vec<(EntityId, EntityId)> {
        let mut pairs = BTreeSet::new();
        for (source, targets) in &self.by_source {
            pairs.extend(targets.keys().map(|t| (source.clone(), t.clone())));
        }
        for (target, sources) in &self.by_target {
            pairs.extend(sources.keys().map(|s| (s.clone(), target.clone())));
        }
        pairs.into_iter().collect()
    }

    pub(crate) fn increment(&mut self, source_id: &str, target_id: &str) -> i32 {
        let count = read_count(&self.by_source, source_id, target_id).unwrap_or(0) + 1;
        self.write(source_id, target_id, Some(count));
        count
    }

    pub(crate) fn decrement(
        &mut self,
        collection: DenormCollection,
        source_id: &str,
        target_id: &str,
    ) -> Result<i32> {
        let current = read_count(&self.by_source, source_id, target_id).unwrap_or(0);
        if current <= 0 {
            return Err(CoreError::InvalidRefCount {
                collection: collection.name().to_string(),
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            });
        }
        let count = current - 1;
        self.write(source_id, target_id, (count > 0).then_some(count));
        Ok(count)
    }

    pub(crate) fn set(
        &mut self,
        source_id: &str,
        target_id: &str,
        count: i32,
    ) -> (Option<i32>, Option<i32>) {
        let previous = self.counts(source_id, target_id);
        self.write(source_id, target_id, (count > 0).then_some(count));
        previous
    }

    pub(crate) fn set_source_side(&mut self, source_id: &str, target_id: &str, count: Option<i32>) {
        write_count(&mut self.by_source, source_id, target_id, count);
    }

    fn write(&mut self, source_id: &str, target_id: &str, count: Option<i32>) {
        write_count(&mut self.by_source, source_id, target_id, count);
        write_count(&mut self.by_target, target_id, source_id, count);
    }
}

fn read_count(map: &BTreeMap<EntityId, BTreeMap<EntityId, i32>>, outer: &str, inner: &str) -> Option<i32> {
    map.get(outer).and_then(|partners| partners.get(inner)).copied()
}

fn write_count(
    map: &mut BTreeMap<EntityId, BTreeMap<EntityId, i32>>,
    outer: &str,
    inner: &str,
    count: Option<i32>,
) {
    match count {
        Some(count) => {
            map.entry(outer.to_string())
                .or_default()
                .insert(inner.to_string(), count);
        }
        None => {
            if let Some(partners) = map.get_mut(outer) {
                partners.remove(inner);
                if partners.is_empty() {
                    map.remove(outer);
                }
            }
        }
    }
}

/// Complete store contents; cloned to form a write transaction's working copy
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) entities: HashMap<EntityType, EntityTable>,
    pub(crate) policies: HashMap<PolicyType, PolicyTable>,
    pub(crate) links: HashMap<LinkKey, LinkTable>,
    pub(crate) refs: HashMap<DenormCollection, RefCountTable>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_index_semantics() {
        let mut table = EntityTable::default();
        table
            .put(EntityType::Identity, TaggedEntity::with_id("a", "a").with_roles(["x", "y"]))
            .unwrap();
        table
            .put(EntityType::Identity, TaggedEntity::with_id("b", "b").with_roles(["x"]))
            .unwrap();

        let tags = vec!["x".to_string(), "y".to_string()];
        assert_eq!(table.matching(&tags, Semantic::AllOf), vec!["a".to_string()]);
        assert_eq!(
            table.matching(&tags, Semantic::AnyOf),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(table.matching(&[], Semantic::AnyOf).is_empty());
    }

    #[test]
    fn test_tag_index_follows_updates() {
        let mut table = EntityTable::default();
        table
            .put(EntityType::Service, TaggedEntity::with_id("s", "web").with_roles(["old"]))
            .unwrap();
        table
            .put(EntityType::Service, TaggedEntity::with_id("s", "web").with_roles(["new"]))
            .unwrap();

        assert!(table.matching(&["old".to_string()], Semantic::AnyOf).is_empty());
        assert_eq!(table.matching(&["new".to_string()], Semantic::AllOf).len(), 1);

        table.delete(EntityType::Service, "s").unwrap();
        assert!(table.matching(&["new".to_string()], Semantic::AllOf).is_empty());
        assert!(table.id_by_name("web").is_none());
    }

    #[test]
    fn test_name_uniqueness() {
        let mut table = EntityTable::default();
        table
            .put(EntityType::EdgeRouter, TaggedEntity::with_id("r1", "edge"))
            .unwrap();
        let err = table
            .put(EntityType::EdgeRouter, TaggedEntity::with_id("r2", "edge"))
            .unwrap_err();
        assert!(matches!(err, CoreError::NameInUse { .. }));
    }

    #[test]
    fn test_link_table_is_idempotent() {
        let mut links = LinkTable::default();
        assert!(links.add("p", "e"));
        assert!(!links.add("p", "e"));
        assert_eq!(links.policies("e"), vec!["p".to_string()]);
        assert_eq!(links.policy_ids(), vec!["p".to_string()]);
        assert!(links.remove("p", "e"));
        assert!(!links.remove("p", "e"));
        assert!(links.policies("e").is_empty());
        assert!(links.policy_ids().is_empty());
    }

    #[test]
    fn test_ref_counts_are_symmetric() {
        let mut refs = RefCountTable::default();
        let collection = DenormCollection::IdentityServiceDial;

        assert_eq!(refs.increment("i", "s"), 1);
        assert_eq!(refs.increment("i", "s"), 2);
        assert_eq!(refs.counts("i", "s"), (Some(2), Some(2)));
        assert_eq!(refs.partners(false, "s"), vec![("i".to_string(), 2)]);

        assert_eq!(refs.decrement(collection, "i", "s").unwrap(), 1);
        assert_eq!(refs.decrement(collection, "i", "s").unwrap(), 0);
        assert_eq!(refs.counts("i", "s"), (None, None));
        assert!(refs.decrement(collection, "i", "s").is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashMap;

        proptest! {
            #[test]
            fn ref_counts_track_a_plain_counter(
                ops in prop::collection::vec((0..3usize, 0..3usize, any::<bool>()), 0..64)
            ) {
                let collection = DenormCollection::IdentityEdgeRouter;
                let mut refs = RefCountTable::default();
                let mut model: HashMap<(usize, usize), i32> = HashMap::new();

                for (s, t, up) in ops {
                    let (source, target) = (format!("i{}", s), format!("r{}", t));
                    let expected = model.entry((s, t)).or_insert(0);
                    if up {
                        *expected += 1;
                        prop_assert_eq!(refs.increment(&source, &target), *expected);
                    } else if *expected == 0 {
                        prop_assert!(refs.decrement(collection, &source, &target).is_err());
                    } else {
                        *expected -= 1;
                        prop_assert_eq!(refs.decrement(collection, &source, &target).unwrap(), *expected);
                    }
                }

                for ((s, t), expected) in model {
                    let stored = (expected > 0).then_some(expected);
                    prop_assert_eq!(
                        refs.counts(&format!("i{}", s), &format!("r{}", t)),
                        (stored, stored)
                    );
                }
            }
        }
    }
}
