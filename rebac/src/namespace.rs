//! Namespace configuration: the relation-expression IR evaluated by [`crate::check`].
//!
//! Mirrors the recursive tagged-variant shape the teacher crate uses for its
//! own schema IR (`Schema::{Null,Flag,Reg,Table,Struct,Array}` in
//! `tlfs-crdt`), but the variants here encode Zanzibar-style relation
//! rewrites instead of CRDT value types.

use std::collections::BTreeMap;

use crate::error::RebacError;

/// A relation rewrite rule: how a relation on an object type is satisfied.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Rewrite {
    /// Satisfied by a matching tuple on this exact relation.
    Direct,
    /// Satisfied if any listed relation is satisfied.
    Union(Vec<String>),
    /// Satisfied if every listed relation is satisfied.
    Intersection(Vec<String>),
    /// Satisfied if `allow` holds and `deny` does not.
    Exclusion { allow: String, deny: String },
    /// For each live tuple `(x, tupleset, object)`, recursively check
    /// `(subject, computed_userset, x)`.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
    },
    /// Alias: checking this relation means checking `relation` instead.
    ComputedUserset(String),
}

/// Relation table for one object type.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ObjectNamespace {
    pub relations: BTreeMap<String, Rewrite>,
}

impl ObjectNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relation(mut self, relation: impl Into<String>, rewrite: Rewrite) -> Self {
        self.relations.insert(relation.into(), rewrite);
        self
    }

    pub fn relation(&self, relation: &str) -> Option<&Rewrite> {
        self.relations.get(relation)
    }

    /// Validates that every relation reference inside this namespace's
    /// rewrites names a relation that exists in the same table, and that
    /// `ComputedUserset`/`Union` chains cannot be statically infinite
    /// (a rewrite referencing only itself with no other branch).
    pub fn validate(&self) -> Result<(), RebacError> {
        for (name, rewrite) in &self.relations {
            self.validate_rewrite(name, rewrite)?;
        }
        Ok(())
    }

    fn validate_rewrite(&self, owner: &str, rewrite: &Rewrite) -> Result<(), RebacError> {
        let refs: Vec<&str> = match rewrite {
            Rewrite::Direct => vec![],
            Rewrite::Union(rs) | Rewrite::Intersection(rs) => rs.iter().map(String::as_str).collect(),
            Rewrite::Exclusion { allow, deny } => vec![allow.as_str(), deny.as_str()],
            Rewrite::TupleToUserset {
                computed_userset, ..
            } => vec![computed_userset.as_str()],
            Rewrite::ComputedUserset(r) => {
                if r == owner {
                    return Err(RebacError::Usage(format!(
                        "relation '{owner}' is a computed alias of itself"
                    )));
                }
                vec![r.as_str()]
            }
        };
        for r in refs {
            if r != owner && !self.relations.contains_key(r) {
                return Err(RebacError::Usage(format!(
                    "relation '{owner}' references undefined relation '{r}'"
                )));
            }
        }
        Ok(())
    }
}

/// The full set of namespace configs, keyed by object type.
#[derive(Clone, Debug, Default)]
pub struct NamespaceRegistry {
    types: BTreeMap<String, ObjectNamespace>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        object_type: impl Into<String>,
        namespace: ObjectNamespace,
    ) -> Result<(), RebacError> {
        namespace.validate()?;
        self.types.insert(object_type.into(), namespace);
        Ok(())
    }

    pub fn get(&self, object_type: &str) -> Option<&ObjectNamespace> {
        self.types.get(object_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_reader_writer_validates() {
        let ns = ObjectNamespace::new()
            .with_relation("reader", Rewrite::Direct)
            .with_relation("writer", Rewrite::Direct)
            .with_relation(
                "editor",
                Rewrite::Union(vec!["reader".into(), "writer".into()]),
            );
        assert!(ns.validate().is_ok());
    }

    #[test]
    fn undefined_relation_reference_rejected() {
        let ns = ObjectNamespace::new().with_relation("editor", Rewrite::ComputedUserset("ghost".into()));
        assert!(ns.validate().is_err());
    }

    #[test]
    fn self_referential_computed_alias_rejected() {
        let ns = ObjectNamespace::new().with_relation("loop", Rewrite::ComputedUserset("loop".into()));
        assert!(ns.validate().is_err());
    }
}
