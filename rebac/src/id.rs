//! Subject/object identifiers for the ReBAC core.

use std::fmt;

/// A zone identifier. Zones are independent permission namespaces.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct ZoneId(pub String);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A typed entity: `(type, id)`, e.g. `("user", "alice")` or `("file", "/doc")`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub id: String,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// A subject is an entity, optionally qualified by a relation
/// (`(type, id, #relation)` — "members of relation `relation` on
/// object `(type, id)`", used by `tupleToUserset` expansion).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Subject {
    pub entity: Entity,
    pub relation: Option<String>,
}

impl Subject {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            relation: None,
        }
    }

    pub fn with_relation(entity: Entity, relation: impl Into<String>) -> Self {
        Self {
            entity,
            relation: Some(relation.into()),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(r) => write!(f, "{}#{}", self.entity, r),
            None => write!(f, "{}", self.entity),
        }
    }
}
