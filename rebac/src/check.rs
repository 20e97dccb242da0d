//! `check`: evaluates a permission query over tuples and namespace configs
//! (spec.md §4.5.2), with Leopard-accelerated group membership and a
//! cycle-safe recursive expansion of the relation rewrite tree.

use std::collections::BTreeSet;

use crate::boundary::BoundaryCache;
use crate::error::{RebacError, Result};
use crate::id::{Entity, Subject, ZoneId};
use crate::leopard::Leopard;
use crate::namespace::{NamespaceRegistry, Rewrite};
use crate::tuple::TupleStore;

const DEFAULT_MAX_DEPTH: u32 = 50;

/// `(subject, relation, object)` — used as the cycle-guard visited key.
type VisitKey = (Entity, String, Entity);

pub struct CheckEngine<'a> {
    pub tuples: &'a TupleStore,
    pub namespaces: &'a NamespaceRegistry,
    pub leopard: &'a Leopard,
    pub boundary: &'a BoundaryCache,
    pub max_depth: u32,
}

impl<'a> CheckEngine<'a> {
    pub fn new(
        tuples: &'a TupleStore,
        namespaces: &'a NamespaceRegistry,
        leopard: &'a Leopard,
        boundary: &'a BoundaryCache,
    ) -> Self {
        Self {
            tuples,
            namespaces,
            leopard,
            boundary,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Object types whose ids are nested path strings, eligible for the
    /// nearest-ancestor boundary cache (spec.md §4.5.5).
    fn is_hierarchical(object_type: &str) -> bool {
        matches!(object_type, "file" | "dir")
    }

    /// `check(subject, permission, object, zone) -> bool`. For hierarchical
    /// object types, consults the boundary cache first: a hit means some
    /// ancestor of `object` was already confirmed allowed for this
    /// `(zone, subject, permission)`, which (because file/dir ids are
    /// nested path strings) also permits `object` itself. Only confirmed
    /// `true` results are ever cached — a miss always falls through to the
    /// full recursive evaluation, so the cache can never manufacture a
    /// false allow.
    pub fn check(&self, subject: &Entity, permission: &str, object: &Entity, zone_id: &ZoneId) -> Result<bool> {
        let subject_key = Subject::new(subject.clone());
        if Self::is_hierarchical(&object.entity_type)
            && self
                .boundary
                .lookup(zone_id, &subject_key, permission, &object.id)
                .is_some()
        {
            return Ok(true);
        }
        let mut visited = BTreeSet::new();
        let allowed = self.eval(subject, permission, object, zone_id, 0, &mut visited)?;
        if allowed && Self::is_hierarchical(&object.entity_type) {
            self.boundary
                .set_boundary(zone_id, &subject_key, permission, &object.id, &object.id);
        }
        Ok(allowed)
    }

    fn eval(
        &self,
        subject: &Entity,
        relation: &str,
        object: &Entity,
        zone_id: &ZoneId,
        depth: u32,
        visited: &mut BTreeSet<VisitKey>,
    ) -> Result<bool> {
        if depth > self.max_depth {
            return Err(RebacError::DepthExceeded {
                relation: relation.to_owned(),
                object: object.to_string(),
            });
        }
        let key = (subject.clone(), relation.to_owned(), object.clone());
        if visited.contains(&key) {
            // Cycle protection: re-entry is "not satisfied", never an error.
            return Ok(false);
        }
        visited.insert(key);

        let rewrite = self
            .namespaces
            .get(&object.entity_type)
            .and_then(|ns| ns.relation(relation));

        let Some(rewrite) = rewrite else {
            // Permission not defined in the namespace: fall back to a direct
            // tuple check on the same relation name (spec.md §4.5.2 step 1).
            return Ok(self.check_direct(subject, relation, object, zone_id));
        };

        match rewrite {
            Rewrite::Direct => Ok(self.check_direct(subject, relation, object, zone_id)),
            Rewrite::Union(relations) => {
                for r in relations {
                    if self.eval(subject, r, object, zone_id, depth + 1, visited)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rewrite::Intersection(relations) => {
                for r in relations {
                    if !self.eval(subject, r, object, zone_id, depth + 1, visited)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Rewrite::Exclusion { allow, deny } => {
                let allowed = self.eval(subject, allow, object, zone_id, depth + 1, visited)?;
                if !allowed {
                    return Ok(false);
                }
                let denied = self.eval(subject, deny, object, zone_id, depth + 1, visited)?;
                Ok(!denied)
            }
            Rewrite::ComputedUserset(r) => self.eval(subject, r, object, zone_id, depth + 1, visited),
            Rewrite::TupleToUserset {
                tupleset,
                computed_userset,
            } => {
                // Tuples are stored from the child's perspective:
                // (object, tupleset, container). For each such tuple, X is
                // the container, and we recursively check
                // (subject, computed_userset, X).
                let links = self.tuples.list_by_subject(zone_id, object);
                for link in links.iter().filter(|t| t.relation == *tupleset) {
                    if self.eval(subject, computed_userset, &link.object, zone_id, depth + 1, visited)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// A direct relation is satisfied by a matching tuple, possibly through
    /// a group subject resolved transitively via Leopard.
    fn check_direct(&self, subject: &Entity, relation: &str, object: &Entity, zone_id: &ZoneId) -> bool {
        let tuples = self.tuples.list_by_object(zone_id, object, Some(relation));
        for t in &tuples {
            if t.subject.relation.is_some() {
                continue; // handled by the tupleToUserset path, not a direct grant
            }
            if t.subject.entity == *subject {
                return true;
            }
            if self.leopard.is_member_of(zone_id, subject, &t.subject.entity) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Subject;
    use crate::leopard::{Leopard, MembershipEdge};
    use crate::namespace::ObjectNamespace;
    use crate::tuple::Tuple;
    use std::time::Duration;

    fn zone() -> ZoneId {
        ZoneId::from("root")
    }

    fn boundary() -> BoundaryCache {
        BoundaryCache::new(100, Duration::from_secs(60))
    }

    fn setup_direct_grant() -> (TupleStore, NamespaceRegistry, Leopard) {
        let tuples = TupleStore::new();
        let mut namespaces = NamespaceRegistry::new();
        let ns = ObjectNamespace::new()
            .with_relation("reader", Rewrite::Direct)
            .with_relation("writer", Rewrite::Direct)
            .with_relation(
                "editor",
                Rewrite::Union(vec!["reader".into(), "writer".into()]),
            );
        namespaces.register("file", ns).unwrap();
        let leopard = Leopard::new(100, Duration::from_secs(60));
        tuples.write(Tuple::new(
            Subject::new(Entity::new("user", "alice")),
            "writer",
            Entity::new("file", "/doc"),
            zone(),
        ));
        (tuples, namespaces, leopard)
    }

    #[test]
    fn s4_direct_grant_and_union() {
        let (tuples, namespaces, leopard) = setup_direct_grant();
        let boundary = boundary();
        let engine = CheckEngine::new(&tuples, &namespaces, &leopard, &boundary);
        let alice = Entity::new("user", "alice");
        let doc = Entity::new("file", "/doc");
        assert!(engine.check(&alice, "editor", &doc, &zone()).unwrap());
        assert!(!engine.check(&alice, "reader", &doc, &zone()).unwrap());
    }

    #[test]
    fn confirmed_allow_on_a_directory_is_reused_for_a_nested_file() {
        let tuples = TupleStore::new();
        let mut namespaces = NamespaceRegistry::new();
        namespaces
            .register("dir", ObjectNamespace::new().with_relation("read", Rewrite::Direct))
            .unwrap();
        let leopard = Leopard::new(100, Duration::from_secs(60));
        let boundary = boundary();
        let alice = Entity::new("user", "alice");
        let workspace = Entity::new("dir", "/workspace");
        tuples.write(Tuple::new(Subject::new(alice.clone()), "read", workspace.clone(), zone()));

        let engine = CheckEngine::new(&tuples, &namespaces, &leopard, &boundary);
        assert!(engine.check(&alice, "read", &workspace, &zone()).unwrap());

        let nested = Entity::new("dir", "/workspace/project/src");
        assert!(boundary
            .lookup(&zone(), &Subject::new(alice.clone()), "read", &nested.id)
            .is_some());
        assert!(engine.check(&alice, "read", &nested, &zone()).unwrap());
    }

    #[test]
    fn s5_tuple_to_userset() {
        let tuples = TupleStore::new();
        let mut namespaces = NamespaceRegistry::new();
        namespaces
            .register(
                "file",
                ObjectNamespace::new().with_relation(
                    "read",
                    Rewrite::TupleToUserset {
                        tupleset: "parent".into(),
                        computed_userset: "read".into(),
                    },
                ),
            )
            .unwrap();
        namespaces
            .register("folder", ObjectNamespace::new().with_relation("read", Rewrite::Direct))
            .unwrap();
        let leopard = Leopard::new(100, Duration::from_secs(60));
        let boundary = boundary();

        let alice = Entity::new("user", "alice");
        let folder_f = Entity::new("folder", "F");
        let file_d = Entity::new("file", "D");
        tuples.write(Tuple::new(Subject::new(alice.clone()), "read", folder_f.clone(), zone()));
        tuples.write(Tuple::new(Subject::new(file_d.clone()), "parent", folder_f.clone(), zone()));

        let engine = CheckEngine::new(&tuples, &namespaces, &leopard, &boundary);
        assert!(engine.check(&alice, "read", &file_d, &zone()).unwrap());
    }

    #[test]
    fn nested_group_membership_via_leopard() {
        let tuples = TupleStore::new();
        let mut namespaces = NamespaceRegistry::new();
        namespaces
            .register("file", ObjectNamespace::new().with_relation("reader", Rewrite::Direct))
            .unwrap();
        let leopard = Leopard::new(100, Duration::from_secs(60));
        leopard.add_edge(
            &zone(),
            MembershipEdge {
                member: Entity::new("user", "alice"),
                group: Entity::new("group", "eng"),
            },
        );
        tuples.write(Tuple::new(
            Subject::new(Entity::new("group", "eng")),
            "reader",
            Entity::new("file", "/doc"),
            zone(),
        ));
        let boundary = boundary();
        let engine = CheckEngine::new(&tuples, &namespaces, &leopard, &boundary);
        assert!(engine
            .check(&Entity::new("user", "alice"), "reader", &Entity::new("file", "/doc"), &zone())
            .unwrap());
    }

    #[test]
    fn undefined_permission_falls_back_to_direct_tuple() {
        let tuples = TupleStore::new();
        let namespaces = NamespaceRegistry::new();
        let leopard = Leopard::new(100, Duration::from_secs(60));
        let boundary = boundary();
        let alice = Entity::new("user", "alice");
        let doc = Entity::new("file", "/doc");
        tuples.write(Tuple::new(Subject::new(alice.clone()), "owner", doc.clone(), zone()));
        let engine = CheckEngine::new(&tuples, &namespaces, &leopard, &boundary);
        assert!(engine.check(&alice, "owner", &doc, &zone()).unwrap());
    }

    #[test]
    fn depth_exceeded_on_pathological_recursion() {
        let tuples = TupleStore::new();
        let mut namespaces = NamespaceRegistry::new();
        namespaces
            .register(
                "file",
                ObjectNamespace::new().with_relation(
                    "a",
                    Rewrite::TupleToUserset {
                        tupleset: "link".into(),
                        computed_userset: "a".into(),
                    },
                ),
            )
            .unwrap();
        let leopard = Leopard::new(100, Duration::from_secs(60));
        // Build a chain longer than max_depth of file:N -link-> file:N+1.
        for i in 0..60 {
            tuples.write(Tuple::new(
                Subject::new(Entity::new("file", i.to_string())),
                "link",
                Entity::new("file", (i + 1).to_string()),
                zone(),
            ));
        }
        let boundary = boundary();
        let mut engine = CheckEngine::new(&tuples, &namespaces, &leopard, &boundary);
        engine.max_depth = 50;
        let result = engine.check(&Entity::new("user", "alice"), "a", &Entity::new("file", "0"), &zone());
        assert!(matches!(result, Err(RebacError::DepthExceeded { .. })));
    }
}
