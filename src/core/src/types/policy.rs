//! Policy definitions shared by the store and the policy engine

use super::entity::{EntityId, EntityType};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Policy types and the entity types each one relates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyType {
    /// Identities may dial/bind services (posture checks attach to services)
    Service,
    /// Identities may use edge routers
    EdgeRouter,
    /// Services may be reached through edge routers
    ServiceEdgeRouter,
}

impl PolicyType {
    /// All policy types
    pub const ALL: [PolicyType; 3] = [
        PolicyType::Service,
        PolicyType::EdgeRouter,
        PolicyType::ServiceEdgeRouter,
    ];

    /// Plural store name
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Service => "servicePolicies",
            PolicyType::EdgeRouter => "edgeRouterPolicies",
            PolicyType::ServiceEdgeRouter => "serviceEdgeRouterPolicies",
        }
    }

    /// Singular name used in messages
    pub fn singular(&self) -> &'static str {
        match self {
            PolicyType::Service => "service policy",
            PolicyType::EdgeRouter => "edge router policy",
            PolicyType::ServiceEdgeRouter => "service edge router policy",
        }
    }

    /// Entity types this policy type carries a role set for
    pub fn sides(&self) -> &'static [EntityType] {
        match self {
            PolicyType::Service => &[
                EntityType::Identity,
                EntityType::Service,
                EntityType::PostureCheck,
            ],
            PolicyType::EdgeRouter => &[EntityType::Identity, EntityType::EdgeRouter],
            PolicyType::ServiceEdgeRouter => &[EntityType::Service, EntityType::EdgeRouter],
        }
    }

    /// Whether the policy type has a role set for the entity type
    pub fn has_side(&self, side: EntityType) -> bool {
        self.sides().contains(&side)
    }

    /// Sides whose first-hop links pair with `side` to form second-hop links
    pub fn related_sides(&self, side: EntityType) -> &'static [EntityType] {
        match (self, side) {
            (PolicyType::Service, EntityType::Identity) => &[EntityType::Service],
            (PolicyType::Service, EntityType::Service) => {
                &[EntityType::Identity, EntityType::PostureCheck]
            }
            (PolicyType::Service, EntityType::PostureCheck) => &[EntityType::Service],
            (PolicyType::EdgeRouter, EntityType::Identity) => &[EntityType::EdgeRouter],
            (PolicyType::EdgeRouter, EntityType::EdgeRouter) => &[EntityType::Identity],
            (PolicyType::ServiceEdgeRouter, EntityType::Service) => &[EntityType::EdgeRouter],
            (PolicyType::ServiceEdgeRouter, EntityType::EdgeRouter) => &[EntityType::Service],
            _ => &[],
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

/// Quantifier applied to a role set's tag roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Semantic {
    /// Entity must carry every tag role
    #[default]
    #[serde(alias = "allOf")]
    AllOf,
    /// Entity must carry at least one tag role
    #[serde(alias = "anyOf")]
    AnyOf,
}

impl Semantic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Semantic::AllOf => "AllOf",
            Semantic::AnyOf => "AnyOf",
        }
    }
}

impl FromStr for Semantic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("allOf") {
            Ok(Semantic::AllOf)
        } else if s.eq_ignore_ascii_case("anyOf") {
            Ok(Semantic::AnyOf)
        } else {
            Err(CoreError::invalid(format!("invalid semantic '{}'", s)))
        }
    }
}

impl fmt::Display for Semantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access granted by a service policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Identity may connect to the service
    #[default]
    Dial,
    /// Identity may host the service
    Bind,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Dial => "Dial",
            PolicyKind::Bind => "Bind",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy definition
///
/// Role sets are keyed by the entity type they select. Entries are `#tag`,
/// `@id` or the wildcard `all`; they are stored normalized (sorted, deduplicated,
/// references resolved to ids) by the policy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unique policy identifier
    pub id: EntityId,

    /// Policy name, unique per policy type
    pub name: String,

    /// Which entity types the policy relates
    pub policy_type: PolicyType,

    /// AllOf/AnyOf quantifier for tag roles
    #[serde(default)]
    pub semantic: Semantic,

    /// Dial or bind (service policies only)
    #[serde(default)]
    pub kind: PolicyKind,

    /// Role sets, one per side
    #[serde(default)]
    pub roles: BTreeMap<EntityType, Vec<String>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    /// Create a new policy with a generated id and empty role sets
    pub fn new(policy_type: PolicyType, name: impl Into<String>) -> Self {
        Self::with_id(policy_type, Uuid::new_v4().to_string(), name)
    }

    /// Create a new policy with a caller-chosen id
    pub fn with_id(policy_type: PolicyType, id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            policy_type,
            semantic: Semantic::default(),
            kind: PolicyKind::default(),
            roles: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the semantic
    pub fn with_semantic(mut self, semantic: Semantic) -> Self {
        self.semantic = semantic;
        self
    }

    /// Set the service policy kind
    pub fn with_kind(mut self, kind: PolicyKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the role set for one side
    pub fn with_roles<I, S>(mut self, side: EntityType, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles
            .insert(side, roles.into_iter().map(Into::into).collect());
        self
    }

    /// Role set for a side (empty when unset)
    pub fn role_set(&self, side: EntityType) -> &[String] {
        self.roles.get(&side).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = Policy::new(PolicyType::Service, "dial-web")
            .with_roles(EntityType::Identity, ["#eng"]);

        assert_eq!(policy.semantic, Semantic::AllOf);
        assert_eq!(policy.kind, PolicyKind::Dial);
        assert_eq!(policy.role_set(EntityType::Identity), ["#eng".to_string()]);
        assert!(policy.role_set(EntityType::Service).is_empty());
    }

    #[test]
    fn test_semantic_parsing() {
        assert_eq!("allof".parse::<Semantic>().unwrap(), Semantic::AllOf);
        assert_eq!("AnyOf".parse::<Semantic>().unwrap(), Semantic::AnyOf);
        assert!("someOf".parse::<Semantic>().is_err());
    }

    #[test]
    fn test_related_sides() {
        assert_eq!(
            PolicyType::Service.related_sides(EntityType::Service),
            &[EntityType::Identity, EntityType::PostureCheck]
        );
        assert_eq!(
            PolicyType::EdgeRouter.related_sides(EntityType::Identity),
            &[EntityType::EdgeRouter]
        );
        assert!(PolicyType::EdgeRouter
            .related_sides(EntityType::Service)
            .is_empty());
        assert!(!PolicyType::ServiceEdgeRouter.has_side(EntityType::Identity));
    }

    #[test]
    fn test_policy_serde() {
        let policy = Policy::with_id(PolicyType::Service, "p1", "bind-db")
            .with_kind(PolicyKind::Bind)
            .with_roles(EntityType::Service, ["@svc1"]);

        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["policyType"], "service");
        assert_eq!(json["kind"], "Bind");
        assert_eq!(json["roles"]["service"][0], "@svc1");

        let back: Policy = serde_json::from_value(json).unwrap();
        assert_eq!(back, policy);
    }
}
