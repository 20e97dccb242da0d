//! `nexus-rebac`: relationship-based access control core.
//!
//! Composes a [`tuple::TupleStore`], a [`namespace::NamespaceRegistry`], the
//! [`leopard::Leopard`] transitive group-closure index, the
//! [`tiger::Tiger`] bitmap cache and the [`boundary::BoundaryCache`] into a
//! single [`RebacEngine`] that answers `check`/`expand`-style queries for a
//! filesystem kernel (spec.md §4.5).

pub mod boundary;
pub mod check;
pub mod error;
pub mod id;
pub mod leopard;
pub mod namespace;
pub mod tiger;
pub mod tuple;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use error::{RebacError, Result};
pub use id::{Entity, Subject, ZoneId};
pub use namespace::{NamespaceRegistry, ObjectNamespace, Rewrite};
pub use tuple::{Tuple, TupleId, TupleStore};

use boundary::BoundaryCache;
use check::CheckEngine;
use leopard::{Leopard, MembershipEdge};
use tiger::Tiger;

/// Configuration for the cache layers (spec.md §9 open questions resolved
/// here: Tiger freshness is `>=`, boundary cache is a fallback behind Tiger).
#[derive(Clone, Copy, Debug)]
pub struct RebacConfig {
    pub leopard_cache_capacity: usize,
    pub leopard_cache_ttl: Duration,
    pub boundary_cache_capacity: usize,
    pub boundary_cache_ttl: Duration,
    pub tiger_staleness_window: u64,
    pub max_check_depth: u32,
}

impl Default for RebacConfig {
    fn default() -> Self {
        Self {
            leopard_cache_capacity: 10_000,
            leopard_cache_ttl: Duration::from_secs(300),
            boundary_cache_capacity: 50_000,
            boundary_cache_ttl: Duration::from_secs(300),
            tiger_staleness_window: 0,
            max_check_depth: 50,
        }
    }
}

/// The relation name treated as "is a member of" for Leopard's closure.
/// Any tuple written with this relation also feeds the closure index.
pub const MEMBERSHIP_RELATION: &str = "member";

pub struct RebacEngine {
    pub tuples: TupleStore,
    pub namespaces: NamespaceRegistry,
    pub leopard: Leopard,
    pub tiger: Tiger,
    pub boundary: BoundaryCache,
    max_depth: u32,
    /// Monotonic counter driving Tiger's `zone_revision` parameter. Tiger is
    /// a process-local accelerator keyed by revision freshness, not the
    /// kernel's durable zone revision (`RebacEngine` has no access to that),
    /// so it gets its own clock: every write/delete bumps it once.
    revision: AtomicU64,
}

impl RebacEngine {
    pub fn new(config: RebacConfig) -> Self {
        Self {
            tuples: TupleStore::new(),
            namespaces: NamespaceRegistry::new(),
            leopard: Leopard::new(config.leopard_cache_capacity, config.leopard_cache_ttl),
            tiger: Tiger::new(config.tiger_staleness_window),
            boundary: BoundaryCache::new(config.boundary_cache_capacity, config.boundary_cache_ttl),
            max_depth: config.max_check_depth,
            revision: AtomicU64::new(0),
        }
    }

    pub fn register_namespace(&mut self, object_type: impl Into<String>, ns: ObjectNamespace) -> Result<()> {
        self.namespaces.register(object_type, ns)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Writes a tuple (spec.md §4.5.1). Membership tuples additionally feed
    /// the Leopard closure; the boundary cache is invalidated under the
    /// object's path when the object type is hierarchical ("file"/"dir").
    /// Tiger's bitmap is granted the same fact, treating the tuple's
    /// relation as the directly-held permission it materialises
    /// (spec.md §4.5.4) — a sound fast-path since `intersect` is never a
    /// superset of the ground truth and callers fall back to `check` for
    /// anything it misses (e.g. permissions reached only via a rewrite).
    pub fn write(&self, tuple: Tuple) -> TupleId {
        if tuple.relation == MEMBERSHIP_RELATION {
            self.leopard.add_edge(
                &tuple.zone_id,
                MembershipEdge {
                    member: tuple.subject.entity.clone(),
                    group: tuple.object.clone(),
                },
            );
        }
        self.boundary.invalidate_prefix(&tuple.object.id);
        let revision = self.next_revision();
        self.tiger.grant(
            &tuple.zone_id,
            &tuple.subject,
            &tuple.relation,
            &tuple.object.entity_type,
            &tuple.object.id,
            revision,
        );
        self.tuples.write(tuple)
    }

    pub fn write_batch(&self, tuples: Vec<Tuple>) -> Vec<TupleId> {
        tuples.into_iter().map(|t| self.write(t)).collect()
    }

    pub fn delete(&self, id: TupleId) -> Option<Tuple> {
        let removed = self.tuples.delete(id);
        if let Some(t) = &removed {
            self.boundary.invalidate_prefix(&t.object.id);
            let revision = self.next_revision();
            self.tiger.revoke(
                &t.zone_id,
                &t.subject,
                &t.relation,
                &t.object.entity_type,
                &t.object.id,
                revision,
            );
            if t.relation == MEMBERSHIP_RELATION {
                let edges = self.live_membership_edges(&t.zone_id);
                self.leopard.rebuild(&t.zone_id, &edges);
            }
        }
        removed
    }

    fn live_membership_edges(&self, zone_id: &ZoneId) -> Vec<MembershipEdge> {
        // A full scan is acceptable here: deletes of membership tuples are
        // rare relative to checks, and spec.md §4.5.3 explicitly allows a
        // per-zone rebuild on delete.
        self.tuples
            .list_by_object_relation_scan(zone_id, MEMBERSHIP_RELATION)
            .into_iter()
            .map(|t| MembershipEdge {
                member: t.subject.entity,
                group: t.object,
            })
            .collect()
    }

    pub fn check(&self, subject: &Entity, permission: &str, object: &Entity, zone_id: &ZoneId) -> Result<bool> {
        let mut engine = CheckEngine::new(&self.tuples, &self.namespaces, &self.leopard, &self.boundary);
        engine.max_depth = self.max_depth;
        engine.check(subject, permission, object, zone_id)
    }

    /// Every live object of `object_type` in `zone` that `subject` holds
    /// `permission` on (spec.md:139's mandatory derived operation, modelled
    /// on `rebac_list_objects` in
    /// `examples/original_source/tests/integration/delegation/test_delegation_full_e2e.py`).
    /// Tiger's bitmap is consulted first as a fast positive-only filter;
    /// every candidate it does *not* hit still goes through a full `check`,
    /// so a cold or stale bitmap never causes an under-count.
    pub fn list_objects(&self, subject: &Entity, permission: &str, object_type: &str, zone_id: &ZoneId) -> Result<Vec<Entity>> {
        let candidates = self.tuples.list_objects_by_type(zone_id, object_type);
        let subject_key = Subject::new(subject.clone());
        let ids: Vec<String> = candidates.iter().map(|e| e.id.clone()).collect();
        let hits: std::collections::BTreeSet<String> = self
            .tiger
            .intersect(zone_id, &subject_key, permission, object_type, &ids)
            .into_iter()
            .collect();

        let mut out = Vec::new();
        for object in candidates {
            if hits.contains(&object.id) || self.check(subject, permission, &object, zone_id)? {
                out.push(object);
            }
        }
        Ok(out)
    }

    /// Every live subject in `zone` that holds `permission` on `object`
    /// (the reverse of `list_objects`, spec.md:139). No Tiger bitmap is
    /// keyed by object, so this always runs a full `check` per candidate
    /// subject — correct but O(subjects), matching the operation's
    /// enumeration nature rather than the hot `check` path.
    pub fn list_subjects(&self, object: &Entity, permission: &str, zone_id: &ZoneId) -> Result<Vec<Entity>> {
        let mut out = Vec::new();
        for subject in self.tuples.list_all_subjects(zone_id) {
            if self.check(&subject, permission, object, zone_id)? {
                out.push(subject);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_wires_namespace_tuple_and_check_together() {
        let mut engine = RebacEngine::new(RebacConfig::default());
        engine
            .register_namespace("file", ObjectNamespace::new().with_relation("reader", Rewrite::Direct))
            .unwrap();
        let zone = ZoneId::from("root");
        let alice = Entity::new("user", "alice");
        let doc = Entity::new("file", "/doc");
        engine.write(Tuple::new(Subject::new(alice.clone()), "reader", doc.clone(), zone.clone()));
        assert!(engine.check(&alice, "reader", &doc, &zone).unwrap());
    }

    #[test]
    fn group_membership_tuple_feeds_leopard() {
        let mut engine = RebacEngine::new(RebacConfig::default());
        engine
            .register_namespace("file", ObjectNamespace::new().with_relation("reader", Rewrite::Direct))
            .unwrap();
        let zone = ZoneId::from("root");
        let alice = Entity::new("user", "alice");
        let eng_group = Entity::new("group", "eng");
        let doc = Entity::new("file", "/doc");
        engine.write(Tuple::new(Subject::new(alice.clone()), MEMBERSHIP_RELATION, eng_group.clone(), zone.clone()));
        engine.write(Tuple::new(Subject::new(eng_group.clone()), "reader", doc.clone(), zone.clone()));
        assert!(engine.check(&alice, "reader", &doc, &zone).unwrap());
    }

    #[test]
    fn write_populates_tiger_and_delete_revokes_it() {
        let engine = RebacEngine::new(RebacConfig::default());
        let zone = ZoneId::from("root");
        let alice = Subject::new(Entity::new("user", "alice"));
        let doc = Entity::new("file", "/doc");
        let id = engine.write(Tuple::new(alice.clone(), "reader", doc.clone(), zone.clone()));
        let hits = engine.tiger.intersect(&zone, &alice, "reader", "file", &["/doc".to_string()]);
        assert_eq!(hits, vec!["/doc".to_string()]);

        engine.delete(id);
        let hits = engine.tiger.intersect(&zone, &alice, "reader", "file", &["/doc".to_string()]);
        assert!(hits.is_empty());
    }

    #[test]
    fn list_objects_and_list_subjects_round_trip() {
        let mut engine = RebacEngine::new(RebacConfig::default());
        engine
            .register_namespace("file", ObjectNamespace::new().with_relation("reader", Rewrite::Direct))
            .unwrap();
        let zone = ZoneId::from("root");
        let alice = Entity::new("user", "alice");
        let bob = Entity::new("user", "bob");
        let doc_a = Entity::new("file", "/a");
        let doc_b = Entity::new("file", "/b");
        engine.write(Tuple::new(Subject::new(alice.clone()), "reader", doc_a.clone(), zone.clone()));
        engine.write(Tuple::new(Subject::new(bob.clone()), "reader", doc_b.clone(), zone.clone()));

        let alice_objects = engine.list_objects(&alice, "reader", "file", &zone).unwrap();
        assert_eq!(alice_objects, vec![doc_a.clone()]);

        let doc_a_subjects = engine.list_subjects(&doc_a, "reader", &zone).unwrap();
        assert_eq!(doc_a_subjects, vec![alice]);
    }
}
