//! The ReBAC tuple store: `(subject, relation, object)` facts, scoped per zone.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use crate::id::{Entity, Subject, ZoneId};

/// Opaque, monotonically assigned tuple identifier, used to address a
/// specific write for revocation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TupleId(pub u64);

/// A single ReBAC fact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tuple {
    pub subject: Subject,
    pub relation: String,
    pub object: Entity,
    pub zone_id: ZoneId,
    pub subject_zone_id: ZoneId,
    pub object_zone_id: ZoneId,
    pub expires_at: Option<u64>,
}

impl Tuple {
    pub fn new(subject: Subject, relation: impl Into<String>, object: Entity, zone_id: ZoneId) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object,
            subject_zone_id: zone_id.clone(),
            object_zone_id: zone_id.clone(),
            zone_id,
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, unix_secs: u64) -> Self {
        self.expires_at = Some(unix_secs);
        self
    }

    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map(|e| e > now).unwrap_or(true)
    }

    /// Key used for the spec's §3 uniqueness invariant:
    /// `(subject, relation, object, zone_id)` is unique among live tuples.
    fn identity_key(&self) -> (Subject, String, Entity, ZoneId) {
        (
            self.subject.clone(),
            self.relation.clone(),
            self.object.clone(),
            self.zone_id.clone(),
        )
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// In-process tuple store. Indexed both by subject and by object so
/// `list_by_subject`/`list_by_object` are O(matching tuples), not O(n).
#[derive(Default)]
pub struct TupleStore {
    next_id: AtomicU64,
    tuples: RwLock<BTreeMap<TupleId, Tuple>>,
    by_subject: RwLock<BTreeMap<(ZoneId, Entity), Vec<TupleId>>>,
    by_object: RwLock<BTreeMap<(ZoneId, Entity), Vec<TupleId>>>,
}

impl TupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a tuple, returning its id. Enforces the uniqueness invariant
    /// by replacing any existing live tuple with the same identity key.
    pub fn write(&self, tuple: Tuple) -> TupleId {
        let now = now_unix();
        let key = tuple.identity_key();
        let mut tuples = self.tuples.write();
        let existing = tuples.iter().find_map(|(id, t)| {
            (t.identity_key() == key && t.is_live(now)).then_some(*id)
        });
        if let Some(id) = existing {
            tuples.insert(id, tuple);
            return id;
        }
        let id = TupleId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.index_insert(&tuple, id);
        tuples.insert(id, tuple);
        id
    }

    pub fn write_batch(&self, tuples: Vec<Tuple>) -> Vec<TupleId> {
        tuples.into_iter().map(|t| self.write(t)).collect()
    }

    pub fn delete(&self, id: TupleId) -> Option<Tuple> {
        let removed = self.tuples.write().remove(&id);
        if let Some(t) = &removed {
            self.index_remove(t, id);
        }
        removed
    }

    fn index_insert(&self, tuple: &Tuple, id: TupleId) {
        self.by_subject
            .write()
            .entry((tuple.zone_id.clone(), tuple.subject.entity.clone()))
            .or_default()
            .push(id);
        self.by_object
            .write()
            .entry((tuple.zone_id.clone(), tuple.object.clone()))
            .or_default()
            .push(id);
    }

    fn index_remove(&self, tuple: &Tuple, id: TupleId) {
        if let Some(v) = self
            .by_subject
            .write()
            .get_mut(&(tuple.zone_id.clone(), tuple.subject.entity.clone()))
        {
            v.retain(|x| *x != id);
        }
        if let Some(v) = self
            .by_object
            .write()
            .get_mut(&(tuple.zone_id.clone(), tuple.object.clone()))
        {
            v.retain(|x| *x != id);
        }
    }

    /// All live tuples whose subject entity matches `subject` in `zone`.
    pub fn list_by_subject(&self, zone_id: &ZoneId, subject: &Entity) -> Vec<Tuple> {
        let now = now_unix();
        let ids = self
            .by_subject
            .read()
            .get(&(zone_id.clone(), subject.clone()))
            .cloned()
            .unwrap_or_default();
        let tuples = self.tuples.read();
        ids.into_iter()
            .filter_map(|id| tuples.get(&id).cloned())
            .filter(|t| t.is_live(now))
            .collect()
    }

    /// All live tuples whose object matches `object` in `zone`, optionally
    /// filtered to a single relation.
    pub fn list_by_object(&self, zone_id: &ZoneId, object: &Entity, relation: Option<&str>) -> Vec<Tuple> {
        let now = now_unix();
        let ids = self
            .by_object
            .read()
            .get(&(zone_id.clone(), object.clone()))
            .cloned()
            .unwrap_or_default();
        let tuples = self.tuples.read();
        ids.into_iter()
            .filter_map(|id| tuples.get(&id).cloned())
            .filter(|t| t.is_live(now) && relation.map(|r| r == t.relation).unwrap_or(true))
            .collect()
    }

    /// True iff a live tuple `(subject, relation, object)` exists in `zone`.
    pub fn has_direct(&self, zone_id: &ZoneId, subject: &Entity, relation: &str, object: &Entity) -> bool {
        self.list_by_object(zone_id, object, Some(relation))
            .iter()
            .any(|t| t.subject.entity == *subject && t.subject.relation.is_none())
    }

    /// All live tuples in `zone` with the given relation, regardless of
    /// object. Used by Leopard's delete-triggered rebuild, where the full
    /// set of membership edges must be recomputed (spec.md §4.5.3).
    pub fn list_by_object_relation_scan(&self, zone_id: &ZoneId, relation: &str) -> Vec<Tuple> {
        let now = now_unix();
        self.tuples
            .read()
            .values()
            .filter(|t| t.zone_id == *zone_id && t.relation == relation && t.is_live(now))
            .cloned()
            .collect()
    }

    /// Every distinct live object of `object_type` that appears in `zone`,
    /// as either a tuple's object or (for hierarchical `TupleToUserset`
    /// expansion) a subject. A full scan, acceptable for the same reason
    /// as `list_by_object_relation_scan`: this backs `list_objects`, a
    /// derived/enumeration operation, not the hot `check` path.
    pub fn list_objects_by_type(&self, zone_id: &ZoneId, object_type: &str) -> Vec<Entity> {
        let now = now_unix();
        let mut seen = std::collections::BTreeSet::new();
        for t in self.tuples.read().values() {
            if t.zone_id != *zone_id || !t.is_live(now) {
                continue;
            }
            if t.object.entity_type == object_type {
                seen.insert(t.object.clone());
            }
            if t.subject.entity.entity_type == object_type {
                seen.insert(t.subject.entity.clone());
            }
        }
        seen.into_iter().collect()
    }

    /// Every distinct live subject entity observed in `zone`, used to back
    /// `list_subjects` (spec.md:139's reverse-lookup derived operation).
    pub fn list_all_subjects(&self, zone_id: &ZoneId) -> Vec<Entity> {
        let now = now_unix();
        self.tuples
            .read()
            .values()
            .filter(|t| t.zone_id == *zone_id && t.is_live(now))
            .map(|t| t.subject.entity.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tuples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> ZoneId {
        ZoneId::from("root")
    }

    #[test]
    fn write_then_list_round_trips() {
        let store = TupleStore::new();
        let alice = Entity::new("user", "alice");
        let doc = Entity::new("file", "/doc");
        store.write(Tuple::new(
            Subject::new(alice.clone()),
            "writer",
            doc.clone(),
            zone(),
        ));
        assert!(store.has_direct(&zone(), &alice, "writer", &doc));
        assert_eq!(store.list_by_subject(&zone(), &alice).len(), 1);
        assert_eq!(store.list_by_object(&zone(), &doc, None).len(), 1);
    }

    #[test]
    fn duplicate_identity_key_replaces_not_duplicates() {
        let store = TupleStore::new();
        let alice = Entity::new("user", "alice");
        let doc = Entity::new("file", "/doc");
        let t = Tuple::new(Subject::new(alice.clone()), "writer", doc.clone(), zone());
        store.write(t.clone());
        store.write(t);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn expired_tuple_is_not_live() {
        let store = TupleStore::new();
        let alice = Entity::new("user", "alice");
        let doc = Entity::new("file", "/doc");
        store.write(
            Tuple::new(Subject::new(alice.clone()), "writer", doc.clone(), zone()).with_expiry(1),
        );
        assert!(!store.has_direct(&zone(), &alice, "writer", &doc));
    }

    #[test]
    fn delete_removes_from_indices() {
        let store = TupleStore::new();
        let alice = Entity::new("user", "alice");
        let doc = Entity::new("file", "/doc");
        let id = store.write(Tuple::new(Subject::new(alice.clone()), "writer", doc.clone(), zone()));
        store.delete(id);
        assert!(!store.has_direct(&zone(), &alice, "writer", &doc));
        assert!(store.list_by_subject(&zone(), &alice).is_empty());
    }
}
