//! Zone manager & path resolver (spec.md §4.3), plus the stale-session
//! generation tracker supplemented from `examples/original_source/`'s
//! `tests/e2e/test_stale_session_server_e2e.py` (Issue #1445): an
//! `OperationContext.agent_generation` older than the zone's recorded
//! generation for that subject is rejected before any permission check
//! runs. Grounded on the teacher's registry-of-named-things pattern
//! (`crdt/src/registry.rs`), generalised from doc registration to zone
//! registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use nexus_rebac::ZoneId;
use parking_lot::RwLock;

use crate::config::ResiliencyConfig;
use crate::error::{NexusError, Result};
use crate::metadata::store::{EntryType, FileMetadata, MetadataStore};
use crate::metadata::oplog::OperationType;
use crate::path::NormalizedPath;
use crate::resiliency::ResiliencyPolicy;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedPath {
    pub zone_id: ZoneId,
    pub path_in_zone: NormalizedPath,
    pub mount_chain: Vec<(ZoneId, NormalizedPath)>,
}

pub struct ZoneManager {
    db: sled::Db,
    root_zone: ZoneId,
    zones: RwLock<BTreeMap<ZoneId, Arc<MetadataStore>>>,
    generations: RwLock<BTreeMap<(ZoneId, String), u64>>,
    metadata_policy: Arc<ResiliencyPolicy>,
}

impl ZoneManager {
    pub fn new(db: sled::Db, root_zone: ZoneId) -> Result<Self> {
        Self::new_with_resiliency(
            db,
            root_zone,
            Arc::new(ResiliencyPolicy::new("metadata-store", ResiliencyConfig::default())),
        )
    }

    pub fn new_with_resiliency(db: sled::Db, root_zone: ZoneId, metadata_policy: Arc<ResiliencyPolicy>) -> Result<Self> {
        let manager = Self {
            db,
            root_zone: root_zone.clone(),
            zones: RwLock::new(BTreeMap::new()),
            generations: RwLock::new(BTreeMap::new()),
            metadata_policy,
        };
        manager.create_zone(root_zone.clone())?;
        manager.seed_root_entry(&root_zone)?;
        Ok(manager)
    }

    fn seed_root_entry(&self, zone_id: &ZoneId) -> Result<()> {
        let store = self.zone(zone_id)?;
        if store.exists(&NormalizedPath::root())? {
            return Ok(());
        }
        let now = crate::metadata::store::now_millis();
        let root_meta = FileMetadata {
            path: "/".to_owned(),
            entry_type: EntryType::Dir,
            backend_name: "local".to_owned(),
            physical_path: "/".to_owned(),
            size: 0,
            etag: String::new(),
            mime_type: "inode/directory".to_owned(),
            created_at: now,
            modified_at: now,
            version: 0,
            i_links_count: 1,
            target_zone_id: None,
            custom_metadata: Default::default(),
        };
        store.put(root_meta, None, None, "system", OperationType::Mkdir)?;
        Ok(())
    }

    /// Registers a new, empty zone (pre-seeded with its own root "/").
    /// Idempotent: re-registering an already-known zone is a no-op.
    pub fn create_zone(&self, zone_id: ZoneId) -> Result<Arc<MetadataStore>> {
        {
            let zones = self.zones.read();
            if let Some(store) = zones.get(&zone_id) {
                return Ok(store.clone());
            }
        }
        let store = Arc::new(MetadataStore::open_with_resiliency(&self.db, zone_id.clone(), self.metadata_policy.clone())?);
        self.zones.write().insert(zone_id.clone(), store.clone());
        if zone_id != self.root_zone {
            self.seed_root_entry(&zone_id)?;
        }
        Ok(store)
    }

    pub fn zone(&self, zone_id: &ZoneId) -> Result<Arc<MetadataStore>> {
        self.zones
            .read()
            .get(zone_id)
            .cloned()
            .ok_or_else(|| NexusError::NotFound(format!("zone {zone_id}")))
    }

    pub fn root_zone(&self) -> &ZoneId {
        &self.root_zone
    }

    /// Creates a MOUNT entry at `path` in `parent_zone` pointing at
    /// `target_zone`, incrementing the target zone's root `i_links_count`
    /// (spec.md §4.3 edge case).
    pub fn mount(&self, parent_zone: &ZoneId, path: &NormalizedPath, target_zone: &ZoneId, actor: &str) -> Result<()> {
        let target_store = self.zone(target_zone)?;
        let parent_store = self.zone(parent_zone)?;

        let mut root = target_store
            .get(&NormalizedPath::root())?
            .ok_or_else(|| NexusError::InvariantViolated(format!("zone {target_zone} missing root entry")))?;
        root.i_links_count += 1;
        target_store.put(root, None, None, actor, OperationType::Mkdir)?;

        let now = crate::metadata::store::now_millis();
        let mount_meta = FileMetadata {
            path: path.to_string(),
            entry_type: EntryType::Mount,
            backend_name: "mount".to_owned(),
            physical_path: path.to_string(),
            size: 0,
            etag: String::new(),
            mime_type: "inode/mount".to_owned(),
            created_at: now,
            modified_at: now,
            version: 0,
            i_links_count: 1,
            target_zone_id: Some(target_zone.0.clone()),
            custom_metadata: Default::default(),
        };
        parent_store.put(mount_meta, None, Some("*"), actor, OperationType::Mkdir)?;
        Ok(())
    }

    /// Walks the mount chain starting at the root zone (spec.md §4.3
    /// algorithm).
    pub fn resolve(&self, path: &NormalizedPath) -> Result<ResolvedPath> {
        let mut current_zone = self.root_zone.clone();
        let mut chain = Vec::new();
        let mut in_zone_components: Vec<&str> = Vec::new();

        for component in path.components() {
            in_zone_components.push(component);
            let candidate = NormalizedPath::root().join(&in_zone_components.join("/"))?;
            let store = self.zone(&current_zone)?;
            if let Some(meta) = store.get(&candidate)? {
                if meta.entry_type == EntryType::Mount {
                    chain.push((current_zone.clone(), candidate));
                    let target = meta
                        .target_zone_id
                        .ok_or_else(|| NexusError::InvariantViolated("mount entry missing target_zone_id".to_owned()))?;
                    let target_zone = ZoneId::from(target.as_str());
                    // verify the target zone is actually reachable (spec.md §4.3
                    // "if a lookup for the mount's target zone fails, fail with not-found")
                    self.zone(&target_zone)?;
                    current_zone = target_zone;
                    in_zone_components.clear();
                }
            }
        }

        let path_in_zone = if in_zone_components.is_empty() {
            NormalizedPath::root()
        } else {
            NormalizedPath::root().join(&in_zone_components.join("/"))?
        };

        Ok(ResolvedPath {
            zone_id: current_zone,
            path_in_zone,
            mount_chain: chain,
        })
    }

    /// Rejects a context whose `agent_generation` is older than the one
    /// last recorded for `subject` in `zone` (stale-session detection).
    pub fn check_generation_fresh(&self, zone: &ZoneId, subject: &str, presented: Option<u64>) -> Result<()> {
        let Some(presented) = presented else {
            return Ok(());
        };
        let current = self
            .generations
            .read()
            .get(&(zone.clone(), subject.to_owned()))
            .copied()
            .unwrap_or(0);
        if presented < current {
            return Err(NexusError::Usage(format!(
                "stale session: subject {subject} presented generation {presented}, current is {current}"
            )));
        }
        Ok(())
    }

    /// Advances `subject`'s recorded generation in `zone`, invalidating any
    /// context carrying an older `agent_generation`.
    pub fn bump_generation(&self, zone: &ZoneId, subject: &str) -> u64 {
        let mut generations = self.generations.write();
        let entry = generations.entry((zone.clone(), subject.to_owned())).or_insert(0);
        *entry += 1;
        *entry
    }
}
