//! Permission-boundary cache: nearest-ancestor cache for hierarchical
//! permission inheritance (spec.md §4.5.5), modelled on the
//! `PermissionBoundaryCache` of `examples/original_source/src/nexus/services/permissions/permission_boundary_cache.py`
//! (TTL map keyed by `(zone, subject, permission)`, values are
//! `path -> ancestor_path`).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::id::{Subject, ZoneId};

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
struct BoundaryGroupKey {
    zone_id: ZoneId,
    subject: Subject,
    permission: String,
}

struct GroupEntry {
    boundaries: BTreeMap<String, String>,
    inserted: Instant,
}

pub struct BoundaryCache {
    groups: Mutex<LruCache<BoundaryGroupKey, GroupEntry>>,
    ttl: Duration,
}

impl BoundaryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            groups: Mutex::new(LruCache::new(capacity.max(1))),
            ttl,
        }
    }

    fn key(zone_id: &ZoneId, subject: &Subject, permission: &str) -> BoundaryGroupKey {
        BoundaryGroupKey {
            zone_id: zone_id.clone(),
            subject: subject.clone(),
            permission: permission.to_owned(),
        }
    }

    /// Records that `file_path`'s nearest ancestor with an explicit grant
    /// (possibly itself) is `ancestor_path`.
    pub fn set_boundary(&self, zone_id: &ZoneId, subject: &Subject, permission: &str, file_path: &str, ancestor_path: &str) {
        let key = Self::key(zone_id, subject, permission);
        let mut groups = self.groups.lock();
        if groups.get_mut(&key).is_none() {
            groups.put(
                key.clone(),
                GroupEntry {
                    boundaries: BTreeMap::new(),
                    inserted: Instant::now(),
                },
            );
        }
        let entry = groups.get_mut(&key).expect("just inserted");
        entry.boundaries.insert(file_path.to_owned(), ancestor_path.to_owned());
        entry.inserted = Instant::now();
    }

    /// Walks from `file_path` up to `/`, returning the first cached
    /// ancestor boundary, if the TTL has not elapsed.
    pub fn lookup(&self, zone_id: &ZoneId, subject: &Subject, permission: &str, file_path: &str) -> Option<String> {
        let key = Self::key(zone_id, subject, permission);
        let mut groups = self.groups.lock();
        let entry = groups.get(&key)?;
        if entry.inserted.elapsed() >= self.ttl {
            return None;
        }
        for ancestor in ancestors_inclusive(file_path) {
            if let Some(boundary) = entry.boundaries.get(&ancestor) {
                return Some(boundary.clone());
            }
        }
        None
    }

    /// Invalidates every entry whose `file_path` or `ancestor_path` starts
    /// with `prefix`, across all subjects/permissions (a grant under a
    /// prefix can change any cached descendant's boundary).
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut groups = self.groups.lock();
        for (_, entry) in groups.iter_mut() {
            entry
                .boundaries
                .retain(|path, ancestor| !path.starts_with(prefix) && !ancestor.starts_with(prefix));
        }
    }
}

fn ancestors_inclusive(path: &str) -> Vec<String> {
    let mut out = vec![path.to_owned()];
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        if idx == 0 {
            if current != "/" {
                out.push("/".to_owned());
            }
            break;
        }
        current = &current[..idx];
        out.push(current.to_owned());
    }
    if !out.contains(&"/".to_owned()) {
        out.push("/".to_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Entity;
    use std::time::Duration;

    fn subject() -> Subject {
        Subject::new(Entity::new("user", "alice"))
    }

    #[test]
    fn descendant_reuses_ancestor_boundary() {
        let cache = BoundaryCache::new(100, Duration::from_secs(60));
        let zone = ZoneId::from("root");
        cache.set_boundary(&zone, &subject(), "read", "/workspace", "/workspace");
        let boundary = cache.lookup(&zone, &subject(), "read", "/workspace/project/src/main.rs");
        assert_eq!(boundary.as_deref(), Some("/workspace"));
    }

    #[test]
    fn invalidate_prefix_clears_matching_entries() {
        let cache = BoundaryCache::new(100, Duration::from_secs(60));
        let zone = ZoneId::from("root");
        cache.set_boundary(&zone, &subject(), "read", "/workspace", "/workspace");
        cache.invalidate_prefix("/workspace");
        assert!(cache
            .lookup(&zone, &subject(), "read", "/workspace/project/main.rs")
            .is_none());
    }

    #[test]
    fn unrelated_prefix_is_not_invalidated() {
        let cache = BoundaryCache::new(100, Duration::from_secs(60));
        let zone = ZoneId::from("root");
        cache.set_boundary(&zone, &subject(), "read", "/other", "/other");
        cache.invalidate_prefix("/workspace");
        assert_eq!(
            cache.lookup(&zone, &subject(), "read", "/other/file.txt").as_deref(),
            Some("/other")
        );
    }
}
