//! Taggable entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque entity/policy identifier
pub type EntityId = String;

/// Kinds of taggable entities that policies relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// Principal that dials or binds services
    Identity,
    /// Network service
    Service,
    /// Router at the edge of the overlay
    EdgeRouter,
    /// Posture check attached to services
    PostureCheck,
}

impl EntityType {
    /// All taggable entity types
    pub const ALL: [EntityType; 4] = [
        EntityType::Identity,
        EntityType::Service,
        EntityType::EdgeRouter,
        EntityType::PostureCheck,
    ];

    /// Plural store name (e.g. "identities")
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Identity => "identities",
            EntityType::Service => "services",
            EntityType::EdgeRouter => "edgeRouters",
            EntityType::PostureCheck => "postureChecks",
        }
    }

    /// Singular name used in messages (e.g. "identity")
    pub fn singular(&self) -> &'static str {
        match self {
            EntityType::Identity => "identity",
            EntityType::Service => "service",
            EntityType::EdgeRouter => "edge router",
            EntityType::PostureCheck => "posture check",
        }
    }

    /// Policy field holding role sets that target this entity type
    pub fn role_field(&self) -> &'static str {
        match self {
            EntityType::Identity => "identityRoles",
            EntityType::Service => "serviceRoles",
            EntityType::EdgeRouter => "edgeRouterRoles",
            EntityType::PostureCheck => "postureCheckRoles",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

/// Entity carrying role attributes (tags)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedEntity {
    /// Unique entity identifier
    pub id: EntityId,

    /// Entity name, unique per entity type
    pub name: String,

    /// Role attributes matched by `#tag` policy roles
    #[serde(default)]
    pub role_attributes: Vec<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl TaggedEntity {
    /// Create a new entity with a generated id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    /// Create a new entity with a caller-chosen id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            role_attributes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the role attributes
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_attributes = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the entity carries the given role attribute
    pub fn has_role(&self, role: &str) -> bool {
        self.role_attributes.iter().any(|r| r == role)
    }
}
