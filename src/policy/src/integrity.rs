//! Integrity Checker/Repairer
//!
//! Recomputes ground truth by brute force and compares it with the stored
//! first-hop links and second-hop counts. Nothing here reads incremental state
//! to decide what should be; the only shared logic is [`matches`].

use crate::error::Result;
use crate::roles::classify;
use crate::semantic::matches;
use overlay_core::{
    DenormCollection, EntityId, EntityType, LinkKey, Policy, PolicyType, ReadTx, WriteTx,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Class of a discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiscrepancyKind {
    /// Source-side and target-side stored counts disagree
    AsymmetricCounts,
    /// Stored count differs from ground truth
    CountDrift,
    /// First-hop link present without a match, or missing for a match
    LinkDrift,
}

/// One detected inconsistency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Discrepancy {
    #[serde(rename_all = "camelCase")]
    AsymmetricCounts {
        collection: DenormCollection,
        source_id: EntityId,
        target_id: EntityId,
        source_count: i32,
        target_count: i32,
    },
    #[serde(rename_all = "camelCase")]
    CountDrift {
        collection: DenormCollection,
        source_id: EntityId,
        target_id: EntityId,
        source_count: i32,
        target_count: i32,
        expected: i32,
    },
    #[serde(rename_all = "camelCase")]
    LinkDrift {
        link: LinkKey,
        policy_id: EntityId,
        entity_id: EntityId,
        linked: bool,
        expected: bool,
    },
}

impl Discrepancy {
    pub fn kind(&self) -> DiscrepancyKind {
        match self {
            Discrepancy::AsymmetricCounts { .. } => DiscrepancyKind::AsymmetricCounts,
            Discrepancy::CountDrift { .. } => DiscrepancyKind::CountDrift,
            Discrepancy::LinkDrift { .. } => DiscrepancyKind::LinkDrift,
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::AsymmetricCounts {
                collection,
                source_id,
                target_id,
                source_count,
                target_count,
            } => write!(
                f,
                "{}: {} {} has count {} for {} {}, which has count {}",
                collection,
                collection.source(),
                source_id,
                source_count,
                collection.target(),
                target_id,
                target_count
            ),
            Discrepancy::CountDrift {
                collection,
                source_id,
                target_id,
                source_count,
                target_count,
                expected,
            } => write!(
                f,
                "{}: {} {} <-> {} {} stored as {}/{}, expected {}",
                collection,
                collection.source(),
                source_id,
                collection.target(),
                target_id,
                source_count,
                target_count,
                expected
            ),
            Discrepancy::LinkDrift {
                link,
                policy_id,
                entity_id,
                linked,
                expected,
            } => write!(
                f,
                "{}: policy {} link to {} is {}, expected {}",
                link,
                policy_id,
                entity_id,
                if *linked { "present" } else { "missing" },
                if *expected { "present" } else { "missing" }
            ),
        }
    }
}

/// Outcome of one integrity run over a policy type
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub policy_type: Option<PolicyType>,
    pub links_checked: usize,
    pub pairs_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub fixed: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Ground truth for one policy type
struct GroundTruth {
    /// (policy id, side) -> matching entity ids
    matched: BTreeMap<(EntityId, EntityType), BTreeSet<EntityId>>,
    /// collection -> (source, target) -> number of policies relating the pair
    counts: BTreeMap<DenormCollection, BTreeMap<(EntityId, EntityId), i32>>,
}

fn compute_ground_truth<T: ReadTx + ?Sized>(
    tx: &T,
    policy_type: PolicyType,
    policies: &[Policy],
) -> Result<GroundTruth> {
    let mut entities: BTreeMap<EntityType, Vec<(EntityId, Vec<String>)>> = BTreeMap::new();
    for side in policy_type.sides() {
        let rows = tx
            .entity_ids(*side)
            .into_iter()
            .filter_map(|id| tx.entity_tags(*side, &id).map(|tags| (id, tags)))
            .collect();
        entities.insert(*side, rows);
    }

    let mut matched = BTreeMap::new();
    for policy in policies {
        for side in policy_type.sides() {
            let roles = classify(side.role_field(), policy.role_set(*side))?;
            let ids: BTreeSet<EntityId> = entities
                .get(side)
                .into_iter()
                .flatten()
                .filter(|(id, tags)| matches(policy.semantic, &roles, id, tags))
                .map(|(id, _)| id.clone())
                .collect();
            matched.insert((policy.id.clone(), *side), ids);
        }
    }

    let mut counts: BTreeMap<DenormCollection, BTreeMap<(EntityId, EntityId), i32>> =
        BTreeMap::new();
    for collection in DenormCollection::for_policy_type(policy_type) {
        let pairs = counts.entry(*collection).or_default();
        for policy in policies {
            if collection.kind().map_or(false, |kind| kind != policy.kind) {
                continue;
            }
            let empty = BTreeSet::new();
            let sources = matched
                .get(&(policy.id.clone(), collection.source()))
                .unwrap_or(&empty);
            let targets = matched
                .get(&(policy.id.clone(), collection.target()))
                .unwrap_or(&empty);
            for source in sources {
                for target in targets {
                    *pairs.entry((source.clone(), target.clone())).or_insert(0) += 1;
                }
            }
        }
    }

    Ok(GroundTruth { matched, counts })
}

/// Compare stored state for a policy type against ground truth
pub fn audit<T: ReadTx + ?Sized>(tx: &T, policy_type: PolicyType) -> Result<IntegrityReport> {
    let policies: Vec<Policy> = tx
        .policy_ids(policy_type)
        .into_iter()
        .filter_map(|id| tx.policy(policy_type, &id))
        .collect();
    let truth = compute_ground_truth(tx, policy_type, &policies)?;

    let mut report = IntegrityReport {
        policy_type: Some(policy_type),
        ..Default::default()
    };

    for policy in &policies {
        for side in policy_type.sides() {
            let link = LinkKey::new(policy_type, *side);
            let stored: BTreeSet<EntityId> =
                tx.linked_entities(link, &policy.id).into_iter().collect();
            let expected = truth
                .matched
                .get(&(policy.id.clone(), *side))
                .cloned()
                .unwrap_or_default();

            report.links_checked += stored.union(&expected).count();
            for entity_id in stored.symmetric_difference(&expected) {
                let linked = stored.contains(entity_id);
                report.discrepancies.push(Discrepancy::LinkDrift {
                    link,
                    policy_id: policy.id.clone(),
                    entity_id: entity_id.clone(),
                    linked,
                    expected: !linked,
                });
            }
        }
    }

    // links left behind by policy rows that no longer exist
    let existing: BTreeSet<&str> = policies.iter().map(|p| p.id.as_str()).collect();
    for side in policy_type.sides() {
        let link = LinkKey::new(policy_type, *side);
        for policy_id in tx.linked_policy_ids(link) {
            if existing.contains(policy_id.as_str()) {
                continue;
            }
            for entity_id in tx.linked_entities(link, &policy_id) {
                report.links_checked += 1;
                report.discrepancies.push(Discrepancy::LinkDrift {
                    link,
                    policy_id: policy_id.clone(),
                    entity_id,
                    linked: true,
                    expected: false,
                });
            }
        }
    }

    for collection in DenormCollection::for_policy_type(policy_type) {
        let expected_pairs = truth.counts.get(collection);
        let mut pairs: BTreeSet<(EntityId, EntityId)> =
            tx.ref_pairs(*collection).into_iter().collect();
        if let Some(expected) = expected_pairs {
            pairs.extend(expected.keys().cloned());
        }

        for (source_id, target_id) in pairs {
            report.pairs_checked += 1;
            let (source_count, target_count) = tx.ref_counts(*collection, &source_id, &target_id);
            let source_count = source_count.unwrap_or(0);
            let target_count = target_count.unwrap_or(0);
            let expected = expected_pairs
                .and_then(|p| p.get(&(source_id.clone(), target_id.clone())))
                .copied()
                .unwrap_or(0);

            if source_count != target_count {
                report.discrepancies.push(Discrepancy::AsymmetricCounts {
                    collection: *collection,
                    source_id: source_id.clone(),
                    target_id: target_id.clone(),
                    source_count,
                    target_count,
                });
            }
            if source_count != expected || target_count != expected {
                report.discrepancies.push(Discrepancy::CountDrift {
                    collection: *collection,
                    source_id,
                    target_id,
                    source_count,
                    target_count,
                    expected,
                });
            }
        }
    }

    debug!(
        policy_type = %policy_type,
        links = report.links_checked,
        pairs = report.pairs_checked,
        discrepancies = report.discrepancies.len(),
        "integrity audit complete"
    );
    Ok(report)
}

/// Audit a policy type and rewrite every drifted link and count
///
/// Returns the report and, per discrepancy, whether it was fixed. First-hop
/// links are repaired before counts.
pub fn audit_and_repair<T: WriteTx + ?Sized>(
    tx: &mut T,
    policy_type: PolicyType,
) -> Result<(IntegrityReport, Vec<bool>)> {
    let mut report = audit(&*tx, policy_type)?;
    let mut fixed = vec![false; report.discrepancies.len()];

    for (index, discrepancy) in report.discrepancies.iter().enumerate() {
        if let Discrepancy::LinkDrift {
            link,
            policy_id,
            entity_id,
            expected,
            ..
        } = discrepancy
        {
            if *expected {
                tx.add_link(*link, policy_id, entity_id)?;
            } else {
                tx.remove_link(*link, policy_id, entity_id)?;
            }
            fixed[index] = true;
        }
    }

    let mut rewritten: BTreeSet<(DenormCollection, EntityId, EntityId)> = BTreeSet::new();
    for (index, discrepancy) in report.discrepancies.iter().enumerate() {
        let (collection, source_id, target_id) = match discrepancy {
            Discrepancy::AsymmetricCounts {
                collection,
                source_id,
                target_id,
                ..
            }
            | Discrepancy::CountDrift {
                collection,
                source_id,
                target_id,
                ..
            } => (*collection, source_id, target_id),
            Discrepancy::LinkDrift { .. } => continue,
        };

        let key = (collection, source_id.clone(), target_id.clone());
        if !rewritten.contains(&key) {
            let expected = expected_count(&report.discrepancies, &key);
            tx.set_ref_count(collection, source_id, target_id, expected)?;
            rewritten.insert(key);
        }
        fixed[index] = true;
    }

    report.fixed = fixed.iter().filter(|f| **f).count();
    if report.fixed > 0 {
        info!(policy_type = %policy_type, fixed = report.fixed, "integrity repair applied");
    }
    Ok((report, fixed))
}

/// Ground-truth count for a pair, taken from its drift entry
///
/// Every asymmetric pair also has a drift entry: at most one of its two
/// stored counts can equal the expected value.
fn expected_count(
    discrepancies: &[Discrepancy],
    key: &(DenormCollection, EntityId, EntityId),
) -> i32 {
    discrepancies
        .iter()
        .find_map(|d| match d {
            Discrepancy::CountDrift {
                collection,
                source_id,
                target_id,
                expected,
                ..
            } if *collection == key.0 && *source_id == key.1 && *target_id == key.2 => {
                Some(*expected)
            }
            _ => None,
        })
        .unwrap_or(0)
}
