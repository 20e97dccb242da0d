//! Tiger: pre-materialised per-subject permission bitmaps for hot list ops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::id::{Subject, ZoneId};

/// `(resource_type, resource_id) <-> i32` table, allocated monotonically
/// per zone, owned by Tiger (spec.md §4.5.4).
#[derive(Default)]
struct ResourceIdMap {
    next: AtomicI32,
    forward: RwLock<BTreeMap<(String, String), i32>>,
    backward: RwLock<BTreeMap<i32, (String, String)>>,
}

impl ResourceIdMap {
    fn intern(&self, resource_type: &str, resource_id: &str) -> i32 {
        let key = (resource_type.to_owned(), resource_id.to_owned());
        if let Some(id) = self.forward.read().get(&key) {
            return *id;
        }
        let mut forward = self.forward.write();
        if let Some(id) = forward.get(&key) {
            return *id;
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        forward.insert(key.clone(), id);
        self.backward.write().insert(id, key);
        id
    }

    fn lookup(&self, resource_type: &str, resource_id: &str) -> Option<i32> {
        self.forward
            .read()
            .get(&(resource_type.to_owned(), resource_id.to_owned()))
            .copied()
    }
}

#[derive(Clone)]
struct BitmapEntry {
    bitmap: RoaringBitmap,
    revision: u64,
}

/// Key identifying one materialised bitmap: `(subject, permission,
/// resource_type, zone)`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
struct BitmapKey {
    zone_id: ZoneId,
    subject: Subject,
    permission: String,
    resource_type: String,
}

/// Status of an asynchronously-expanding batch grant (e.g. a directory-level
/// "include future files" grant), queried by callers per spec.md §4.5.4.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExpansionStatus {
    Pending,
    InProgress { done: u64, total: u64 },
    Complete,
}

pub struct Tiger {
    resources: ResourceIdMap,
    bitmaps: RwLock<BTreeMap<BitmapKey, BitmapEntry>>,
    expansions: RwLock<BTreeMap<String, ExpansionStatus>>,
    /// A bitmap is considered fresh iff `revision >= zone_revision - staleness_window`.
    staleness_window: u64,
}

impl Tiger {
    pub fn new(staleness_window: u64) -> Self {
        Self {
            resources: ResourceIdMap::default(),
            bitmaps: RwLock::new(BTreeMap::new()),
            expansions: RwLock::new(BTreeMap::new()),
            staleness_window,
        }
    }

    pub fn intern_resource(&self, resource_type: &str, resource_id: &str) -> i32 {
        self.resources.intern(resource_type, resource_id)
    }

    fn key(zone_id: &ZoneId, subject: &Subject, permission: &str, resource_type: &str) -> BitmapKey {
        BitmapKey {
            zone_id: zone_id.clone(),
            subject: subject.clone(),
            permission: permission.to_owned(),
            resource_type: resource_type.to_owned(),
        }
    }

    /// Write-through: grants a resource into the cached bitmap, advancing
    /// its revision. Called from the ReBAC write path.
    pub fn grant(
        &self,
        zone_id: &ZoneId,
        subject: &Subject,
        permission: &str,
        resource_type: &str,
        resource_id: &str,
        zone_revision: u64,
    ) {
        let int_id = self.resources.intern(resource_type, resource_id);
        let key = Self::key(zone_id, subject, permission, resource_type);
        let mut bitmaps = self.bitmaps.write();
        let entry = bitmaps.entry(key).or_insert_with(|| BitmapEntry {
            bitmap: RoaringBitmap::new(),
            revision: zone_revision,
        });
        entry.bitmap.insert(int_id as u32);
        entry.revision = entry.revision.max(zone_revision);
    }

    pub fn revoke(
        &self,
        zone_id: &ZoneId,
        subject: &Subject,
        permission: &str,
        resource_type: &str,
        resource_id: &str,
        zone_revision: u64,
    ) {
        let Some(int_id) = self.resources.lookup(resource_type, resource_id) else {
            return;
        };
        let key = Self::key(zone_id, subject, permission, resource_type);
        if let Some(entry) = self.bitmaps.write().get_mut(&key) {
            entry.bitmap.remove(int_id as u32);
            entry.revision = entry.revision.max(zone_revision);
        }
    }

    /// True iff the bitmap for this key exists and its revision is
    /// `>= zone_revision` (spec.md §9 open question — resolved as `>=`,
    /// include-equal, so a grant materialised at exactly the read's
    /// revision still counts as fresh).
    pub fn is_fresh(&self, zone_id: &ZoneId, subject: &Subject, permission: &str, resource_type: &str, zone_revision: u64) -> bool {
        let key = Self::key(zone_id, subject, permission, resource_type);
        self.bitmaps
            .read()
            .get(&key)
            .map(|e| e.revision + self.staleness_window >= zone_revision)
            .unwrap_or(false)
    }

    /// Intersects `candidates` (resource ids in the caller's address space)
    /// with the cached bitmap, returning the subset of `candidates` that are
    /// permitted according to the last-materialised bitmap. Never a superset
    /// of the ground truth at the bitmap's own revision (spec.md §8 #9).
    pub fn intersect(
        &self,
        zone_id: &ZoneId,
        subject: &Subject,
        permission: &str,
        resource_type: &str,
        candidates: &[String],
    ) -> Vec<String> {
        let key = Self::key(zone_id, subject, permission, resource_type);
        let bitmaps = self.bitmaps.read();
        let Some(entry) = bitmaps.get(&key) else {
            return vec![];
        };
        candidates
            .iter()
            .filter(|id| {
                self.resources
                    .lookup(resource_type, id)
                    .map(|int_id| entry.bitmap.contains(int_id as u32))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn set_expansion_status(&self, batch_id: impl Into<String>, status: ExpansionStatus) {
        self.expansions.write().insert(batch_id.into(), status);
    }

    pub fn expansion_status(&self, batch_id: &str) -> Option<ExpansionStatus> {
        self.expansions.read().get(batch_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Entity;

    fn subject() -> Subject {
        Subject::new(Entity::new("user", "alice"))
    }

    #[test]
    fn grant_then_intersect_finds_resource() {
        let tiger = Tiger::new(0);
        let zone = ZoneId::from("root");
        tiger.grant(&zone, &subject(), "read", "file", "/a.txt", 1);
        let hits = tiger.intersect(
            &zone,
            &subject(),
            "read",
            "file",
            &["/a.txt".to_string(), "/b.txt".to_string()],
        );
        assert_eq!(hits, vec!["/a.txt".to_string()]);
    }

    #[test]
    fn revoke_removes_from_bitmap() {
        let tiger = Tiger::new(0);
        let zone = ZoneId::from("root");
        tiger.grant(&zone, &subject(), "read", "file", "/a.txt", 1);
        tiger.revoke(&zone, &subject(), "read", "file", "/a.txt", 2);
        let hits = tiger.intersect(&zone, &subject(), "read", "file", &["/a.txt".to_string()]);
        assert!(hits.is_empty());
    }

    #[test]
    fn freshness_uses_inclusive_comparison() {
        let tiger = Tiger::new(0);
        let zone = ZoneId::from("root");
        tiger.grant(&zone, &subject(), "read", "file", "/a.txt", 5);
        assert!(tiger.is_fresh(&zone, &subject(), "read", "file", 5));
        assert!(!tiger.is_fresh(&zone, &subject(), "read", "file", 6));
    }
}
