//! Leopard: transitive group-closure index for O(1) nested-group checks.
//!
//! Maintains, per zone, `member -> {(group, depth)}` for all
//! membership-style relations. Incremental on writes; deletes fall back
//! to a full rebuild of the affected zone (spec.md §4.5.3 explicitly
//! allows this).

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::id::{Entity, ZoneId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ClosureEntry {
    pub depth: u32,
}

/// Closure storage for one zone: `member -> group -> min depth`.
#[derive(Default)]
struct ZoneClosure {
    closure: BTreeMap<Entity, BTreeMap<Entity, u32>>,
}

/// A raw `(member, member-of, group)` edge, as observed from membership
/// tuple writes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MembershipEdge {
    pub member: Entity,
    pub group: Entity,
}

pub struct Leopard {
    zones: Mutex<BTreeMap<ZoneId, ZoneClosure>>,
    cache: Mutex<LruCache<(ZoneId, Entity), (BTreeSet<Entity>, Instant)>>,
    cache_ttl: Duration,
}

impl Leopard {
    pub fn new(cache_capacity: usize, cache_ttl: Duration) -> Self {
        Self {
            zones: Mutex::new(BTreeMap::new()),
            cache: Mutex::new(LruCache::new(cache_capacity.max(1))),
            cache_ttl,
        }
    }

    /// Incrementally adds `(member, member-of, group)`: for every group the
    /// member already transitively reaches, and everyone who transitively
    /// reaches `member`, extend the closure.
    pub fn add_edge(&self, zone_id: &ZoneId, edge: MembershipEdge) {
        let mut zones = self.zones.lock();
        let zc = zones.entry(zone_id.clone()).or_default();

        let mut new_pairs: Vec<(Entity, Entity, u32)> = vec![(edge.member.clone(), edge.group.clone(), 1)];

        let member_groups: Vec<(Entity, u32)> = zc
            .closure
            .get(&edge.group)
            .map(|m| m.iter().map(|(g, d)| (g.clone(), *d)).collect())
            .unwrap_or_default();
        for (g, d) in &member_groups {
            new_pairs.push((edge.member.clone(), g.clone(), d + 1));
        }

        let ancestors: Vec<(Entity, u32)> = zc
            .closure
            .iter()
            .filter_map(|(m, groups)| groups.get(&edge.member).map(|d| (m.clone(), *d)))
            .collect();
        for (ancestor, d) in &ancestors {
            new_pairs.push((ancestor.clone(), edge.group.clone(), d + 1));
            for (g, gd) in &member_groups {
                new_pairs.push((ancestor.clone(), g.clone(), d + gd + 1));
            }
        }

        for (member, group, depth) in new_pairs {
            let entry = zc.closure.entry(member).or_default();
            let slot = entry.entry(group).or_insert(depth);
            if depth < *slot {
                *slot = depth;
            }
        }
        drop(zones);
        self.invalidate_member(zone_id, &edge.member);
    }

    /// Recomputes the closure for `zone` from scratch given the full set of
    /// live membership edges. Returns the number of closure entries written.
    /// Used both for offline rebuild and after a delete (spec.md §4.5.3).
    pub fn rebuild(&self, zone_id: &ZoneId, edges: &[MembershipEdge]) -> usize {
        let mut adjacency: BTreeMap<Entity, BTreeSet<Entity>> = BTreeMap::new();
        for e in edges {
            adjacency.entry(e.member.clone()).or_default().insert(e.group.clone());
        }
        let mut closure: BTreeMap<Entity, BTreeMap<Entity, u32>> = BTreeMap::new();
        for member in adjacency.keys() {
            let mut visited: BTreeMap<Entity, u32> = BTreeMap::new();
            let mut frontier: Vec<(Entity, u32)> = vec![(member.clone(), 0)];
            while let Some((node, depth)) = frontier.pop() {
                if let Some(groups) = adjacency.get(&node) {
                    for g in groups {
                        let next_depth = depth + 1;
                        let better = visited.get(g).map(|d| next_depth < *d).unwrap_or(true);
                        if better {
                            visited.insert(g.clone(), next_depth);
                            frontier.push((g.clone(), next_depth));
                        }
                    }
                }
            }
            if !visited.is_empty() {
                closure.insert(member.clone(), visited);
            }
        }
        let count: usize = closure.values().map(|m| m.len()).sum();
        let mut zones = self.zones.lock();
        let zc = zones.entry(zone_id.clone()).or_default();
        zc.closure = closure;
        drop(zones);
        self.invalidate_zone(zone_id);
        tracing::debug!(%zone_id, edges = edges.len(), pairs = count, "leopard closure rebuilt");
        count
    }

    /// Returns a copy of the transitive groups reachable from `member`,
    /// consulting the TTL cache first (callers must not be able to mutate
    /// the cached set).
    pub fn get_transitive_groups(&self, zone_id: &ZoneId, member: &Entity) -> BTreeSet<Entity> {
        let key = (zone_id.clone(), member.clone());
        {
            let mut cache = self.cache.lock();
            if let Some((groups, inserted)) = cache.get(&key) {
                if inserted.elapsed() < self.cache_ttl {
                    return groups.clone();
                }
            }
        }
        let groups: BTreeSet<Entity> = self
            .zones
            .lock()
            .get(zone_id)
            .and_then(|zc| zc.closure.get(member))
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        self.cache.lock().put(key, (groups.clone(), Instant::now()));
        groups
    }

    pub fn is_member_of(&self, zone_id: &ZoneId, member: &Entity, group: &Entity) -> bool {
        member == group || self.get_transitive_groups(zone_id, member).contains(group)
    }

    fn invalidate_member(&self, zone_id: &ZoneId, member: &Entity) {
        self.cache.lock().pop(&(zone_id.clone(), member.clone()));
    }

    fn invalidate_zone(&self, zone_id: &ZoneId) {
        let mut cache = self.cache.lock();
        let stale: Vec<_> = cache
            .iter()
            .filter(|((z, _), _)| z == zone_id)
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            cache.pop(&k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn e(t: &str, id: &str) -> Entity {
        Entity::new(t, id)
    }

    #[test]
    fn transitive_closure_depth_two() {
        let leopard = Leopard::new(100, Duration::from_secs(60));
        let zone = ZoneId::from("z");
        leopard.add_edge(
            &zone,
            MembershipEdge {
                member: e("group", "a"),
                group: e("group", "b"),
            },
        );
        leopard.add_edge(
            &zone,
            MembershipEdge {
                member: e("group", "b"),
                group: e("group", "c"),
            },
        );
        assert!(leopard.is_member_of(&zone, &e("group", "a"), &e("group", "c")));
        let groups = leopard.get_transitive_groups(&zone, &e("group", "a"));
        assert!(groups.contains(&e("group", "b")));
        assert!(groups.contains(&e("group", "c")));
    }

    #[test]
    fn rebuild_matches_incremental() {
        let edges = vec![
            MembershipEdge {
                member: e("group", "a"),
                group: e("group", "b"),
            },
            MembershipEdge {
                member: e("group", "b"),
                group: e("group", "c"),
            },
        ];
        let leopard = Leopard::new(100, Duration::from_secs(60));
        let zone = ZoneId::from("z");
        let written = leopard.rebuild(&zone, &edges);
        assert_eq!(written, 3); // a->b, a->c, b->c
        assert!(leopard.is_member_of(&zone, &e("group", "a"), &e("group", "c")));
    }
}
