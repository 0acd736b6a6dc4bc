//! Link collection identifiers
//!
//! First-hop links join a policy to the entities it currently matches on one side.
//! Second-hop (denormalized) links join two entity types directly and carry the
//! number of policies that relate the pair.

use super::entity::EntityType;
use super::policy::{PolicyKind, PolicyType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses the first-hop link set of one policy type on one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub policy_type: PolicyType,
    pub side: EntityType,
}

impl LinkKey {
    pub fn new(policy_type: PolicyType, side: EntityType) -> Self {
        Self { policy_type, side }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.policy_type.as_str(), self.side.as_str())
    }
}

/// Ref-counted entity-to-entity collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DenormCollection {
    IdentityServiceDial,
    IdentityServiceBind,
    PostureCheckServiceDial,
    PostureCheckServiceBind,
    IdentityEdgeRouter,
    ServiceEdgeRouter,
}

impl DenormCollection {
    /// All denormalized collections
    pub const ALL: [DenormCollection; 6] = [
        DenormCollection::IdentityServiceDial,
        DenormCollection::IdentityServiceBind,
        DenormCollection::PostureCheckServiceDial,
        DenormCollection::PostureCheckServiceBind,
        DenormCollection::IdentityEdgeRouter,
        DenormCollection::ServiceEdgeRouter,
    ];

    /// Name used in logs and integrity reports
    pub fn name(&self) -> &'static str {
        match self {
            DenormCollection::IdentityServiceDial => "identity-services/dial",
            DenormCollection::IdentityServiceBind => "identity-services/bind",
            DenormCollection::PostureCheckServiceDial => "posture-check-services/dial",
            DenormCollection::PostureCheckServiceBind => "posture-check-services/bind",
            DenormCollection::IdentityEdgeRouter => "identity-edge-routers",
            DenormCollection::ServiceEdgeRouter => "service-edge-routers",
        }
    }

    /// Entity type on the source side of each pair
    pub fn source(&self) -> EntityType {
        match self {
            DenormCollection::IdentityServiceDial
            | DenormCollection::IdentityServiceBind
            | DenormCollection::IdentityEdgeRouter => EntityType::Identity,
            DenormCollection::PostureCheckServiceDial
            | DenormCollection::PostureCheckServiceBind => EntityType::PostureCheck,
            DenormCollection::ServiceEdgeRouter => EntityType::Service,
        }
    }

    /// Entity type on the target side of each pair
    pub fn target(&self) -> EntityType {
        match self {
            DenormCollection::IdentityEdgeRouter | DenormCollection::ServiceEdgeRouter => {
                EntityType::EdgeRouter
            }
            _ => EntityType::Service,
        }
    }

    /// Policy type feeding the collection
    pub fn policy_type(&self) -> PolicyType {
        match self {
            DenormCollection::IdentityEdgeRouter => PolicyType::EdgeRouter,
            DenormCollection::ServiceEdgeRouter => PolicyType::ServiceEdgeRouter,
            _ => PolicyType::Service,
        }
    }

    /// Service policy kind feeding the collection, if the collection is kind-specific
    pub fn kind(&self) -> Option<PolicyKind> {
        match self {
            DenormCollection::IdentityServiceDial | DenormCollection::PostureCheckServiceDial => {
                Some(PolicyKind::Dial)
            }
            DenormCollection::IdentityServiceBind | DenormCollection::PostureCheckServiceBind => {
                Some(PolicyKind::Bind)
            }
            _ => None,
        }
    }

    /// Collections fed by a policy type
    pub fn for_policy_type(policy_type: PolicyType) -> &'static [DenormCollection] {
        match policy_type {
            PolicyType::Service => &[
                DenormCollection::IdentityServiceDial,
                DenormCollection::IdentityServiceBind,
                DenormCollection::PostureCheckServiceDial,
                DenormCollection::PostureCheckServiceBind,
            ],
            PolicyType::EdgeRouter => &[DenormCollection::IdentityEdgeRouter],
            PolicyType::ServiceEdgeRouter => &[DenormCollection::ServiceEdgeRouter],
        }
    }

    /// Collection joining two sides of a policy of the given type and kind
    ///
    /// The side order does not matter. Returns `None` for side pairs the policy
    /// type does not denormalize.
    pub fn select(
        policy_type: PolicyType,
        kind: PolicyKind,
        side: EntityType,
        related_side: EntityType,
    ) -> Option<DenormCollection> {
        Self::for_policy_type(policy_type).iter().copied().find(|c| {
            let kind_matches = c.kind().map_or(true, |k| k == kind);
            let sides_match = (c.source() == side && c.target() == related_side)
                || (c.source() == related_side && c.target() == side);
            kind_matches && sides_match
        })
    }
}

impl fmt::Display for DenormCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
