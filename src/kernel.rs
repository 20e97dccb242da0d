//! Filesystem kernel (spec.md §4.6): wires the resolver, overlay resolver,
//! permission enforcer, metadata store and CAS into the public
//! read/write/list/delete/rename/mkdir/rmdir surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use nexus_rebac::{Entity, Subject, ZoneId};

use crate::cas::CasStore;
use crate::context::OperationContext;
use crate::error::{NexusError, Result};
use crate::events::{ChangeEvent, ChangeEventType, EventSink, ReadSetTracker};
use crate::hash::hash_content;
use crate::metadata::oplog::OperationType;
use crate::metadata::store::{now_millis, EntryType, FileMetadata};
use crate::metadata::version::{SourceType, VersionDiff, VersionRecord};
use crate::path::NormalizedPath;
use crate::zone::ZoneManager;

/// Consumed interface (spec.md §6 "Permission enforcer callback"); the
/// kernel calls this, `nexus-rebac` implements it.
pub trait PermissionEnforcer: Send + Sync {
    fn check(&self, subject: &Entity, permission: &str, object: &Entity, zone_id: &ZoneId) -> Result<bool>;

    /// Filters `objects` down to those `subject` holds `permission` on.
    /// The default falls back to one `check` per candidate; implementors
    /// backed by an accelerator (Tiger's bitmap, spec.md §4.5.4/§4.6)
    /// override this to skip the per-candidate round trip for hits, still
    /// falling back to `check` for anything the accelerator misses so the
    /// result is never less complete than the naive path.
    fn filter_permitted(&self, subject: &Entity, permission: &str, objects: Vec<Entity>, zone_id: &ZoneId) -> Result<Vec<Entity>> {
        let mut out = Vec::with_capacity(objects.len());
        for object in objects {
            if self.check(subject, permission, &object, zone_id)? {
                out.push(object);
            }
        }
        Ok(out)
    }
}

impl PermissionEnforcer for nexus_rebac::RebacEngine {
    fn check(&self, subject: &Entity, permission: &str, object: &Entity, zone_id: &ZoneId) -> Result<bool> {
        nexus_rebac::RebacEngine::check(self, subject, permission, object, zone_id).map_err(NexusError::from)
    }

    fn filter_permitted(&self, subject: &Entity, permission: &str, objects: Vec<Entity>, zone_id: &ZoneId) -> Result<Vec<Entity>> {
        if objects.is_empty() {
            return Ok(objects);
        }
        let resource_type = objects[0].entity_type.clone();
        let ids: Vec<String> = objects.iter().map(|e| e.id.clone()).collect();
        let subject_key = Subject::new(subject.clone());
        let hits: std::collections::BTreeSet<String> = self
            .tiger
            .intersect(zone_id, &subject_key, permission, &resource_type, &ids)
            .into_iter()
            .collect();

        let mut out = Vec::with_capacity(objects.len());
        for object in objects {
            if hits.contains(&object.id) || self.check(subject, permission, &object, zone_id)? {
                out.push(object);
            }
        }
        Ok(out)
    }
}

pub struct KernelConfig {
    pub admins_bypass_permissions: bool,
    /// When true, `read` on a denied path returns `NotFound` rather than
    /// `PermissionDenied` to avoid existence disclosure (spec.md §7).
    pub deny_as_not_found: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            admins_bypass_permissions: true,
            deny_as_not_found: false,
        }
    }
}

pub struct Kernel {
    zones: Arc<ZoneManager>,
    cas: Arc<CasStore>,
    enforcer: Arc<dyn PermissionEnforcer>,
    events: Arc<dyn EventSink>,
    read_set: Option<Arc<dyn ReadSetTracker>>,
    config: KernelConfig,
}

fn object_entity(object_type: &str, path: &NormalizedPath) -> Entity {
    Entity::new(object_type, path.as_str())
}

impl Kernel {
    pub fn new(
        zones: Arc<ZoneManager>,
        cas: Arc<CasStore>,
        enforcer: Arc<dyn PermissionEnforcer>,
        events: Arc<dyn EventSink>,
        read_set: Option<Arc<dyn ReadSetTracker>>,
        config: KernelConfig,
    ) -> Self {
        Self { zones, cas, enforcer, events, read_set, config }
    }

    fn check_permission(&self, context: &OperationContext, permission: &str, zone_id: &ZoneId, path: &NormalizedPath) -> Result<()> {
        if context.is_admin() && self.config.admins_bypass_permissions {
            return Ok(());
        }
        self.zones.check_generation_fresh(zone_id, &context.subject_key(), context.agent_generation())?;
        let object = object_entity("file", path);
        let subject_entity = Entity::new(context.subject_type(), context.subject_id());
        let allowed = self.enforcer.check(&subject_entity, permission, &object, zone_id)?;
        if allowed {
            return Ok(());
        }
        if self.config.deny_as_not_found {
            Err(NexusError::NotFound(path.to_string()))
        } else {
            Err(NexusError::PermissionDenied {
                subject: context.subject().to_string(),
                permission: permission.to_owned(),
                object: object.to_string(),
            })
        }
    }

    fn emit(&self, zone_id: &ZoneId, revision: u64, path: &str, event_type: ChangeEventType, actor: &str) {
        self.events.publish(ChangeEvent {
            event_id: 0,
            zone_id: zone_id.clone(),
            revision,
            path: path.to_owned(),
            event_type,
            actor: actor.to_owned(),
            timestamp: now_millis(),
        });
        if let Some(tracker) = &self.read_set {
            tracker.record(zone_id, path, revision);
        }
    }

    pub fn read(&self, path: &str, context: &OperationContext) -> Result<(FileMetadata, Vec<u8>)> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "read", &resolved.zone_id, &resolved.path_in_zone)?;

        let store = self.zones.zone(&resolved.zone_id)?;
        let meta = store
            .get(&resolved.path_in_zone)?
            .ok_or_else(|| NexusError::NotFound(path.to_string()))?;
        if meta.entry_type != EntryType::Reg {
            return Err(NexusError::Usage(format!("{path} is not a regular file")));
        }
        let bytes = self.cas.read_blob(&meta.etag, true)?;
        if let Some(tracker) = &self.read_set {
            tracker.record(&resolved.zone_id, resolved.path_in_zone.as_str(), meta.version);
        }
        Ok((meta, bytes))
    }

    /// Write lifecycle exactly as spec.md §4.6 describes: normalise →
    /// resolve → check WRITE → hash + `cas.store` → metadata transaction →
    /// release the superseded blob → emit event.
    pub fn write(
        &self,
        path: &str,
        bytes: &[u8],
        context: &OperationContext,
        if_match: Option<&str>,
        if_none_match: Option<&str>,
    ) -> Result<FileMetadata> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "write", &resolved.zone_id, &resolved.path_in_zone)?;

        let store = self.zones.zone(&resolved.zone_id)?;
        let previous = store.get(&resolved.path_in_zone)?;
        let hash = hash_content(bytes);
        self.cas.store(&hash, bytes, BTreeMap::new())?;

        let now = now_millis();
        let meta = FileMetadata {
            path: resolved.path_in_zone.to_string(),
            entry_type: EntryType::Reg,
            backend_name: "local".to_owned(),
            physical_path: resolved.path_in_zone.to_string(),
            size: bytes.len() as u64,
            etag: hash.clone(),
            mime_type: previous.as_ref().map(|p| p.mime_type.clone()).unwrap_or_else(|| "application/octet-stream".to_owned()),
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            modified_at: now,
            version: 0,
            i_links_count: 1,
            target_zone_id: None,
            custom_metadata: previous.as_ref().map(|p| p.custom_metadata.clone()).unwrap_or_default(),
        };

        let outcome = store.put(meta, if_match, if_none_match, context.subject_key().as_str(), OperationType::Write)?;
        store.create_version(
            &resolved.path_in_zone,
            &hash,
            bytes.len() as u64,
            context.subject_key().as_str(),
            if previous.is_some() { SourceType::Update } else { SourceType::Original },
            None,
        )?;

        if let Some(prev) = previous {
            if prev.etag != hash {
                self.cas.release(&prev.etag)?;
            }
        }

        self.emit(&resolved.zone_id, outcome.revision, resolved.path_in_zone.as_str(), ChangeEventType::Write, context.subject_key().as_str());
        Ok(outcome.metadata)
    }

    pub fn delete(&self, path: &str, context: &OperationContext) -> Result<()> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "write", &resolved.zone_id, &resolved.path_in_zone)?;

        let store = self.zones.zone(&resolved.zone_id)?;
        let meta = store
            .get(&resolved.path_in_zone)?
            .ok_or_else(|| NexusError::NotFound(path.to_string()))?;
        let revision = store.delete(&resolved.path_in_zone, context.subject_key().as_str())?;
        if meta.entry_type == EntryType::Reg {
            self.cas.release(&meta.etag)?;
        }
        self.emit(&resolved.zone_id, revision, resolved.path_in_zone.as_str(), ChangeEventType::Delete, context.subject_key().as_str());
        Ok(())
    }

    /// Atomic within a zone; across a mount boundary this degrades to
    /// best-effort copy-then-delete (spec.md §4.6, §9 open question).
    pub fn rename(&self, old: &str, new: &str, context: &OperationContext) -> Result<FileMetadata> {
        let old_path = NormalizedPath::parse(old)?;
        let new_path = NormalizedPath::parse(new)?;
        let old_resolved = self.zones.resolve(&old_path)?;
        let new_resolved = self.zones.resolve(&new_path)?;

        self.check_permission(context, "write", &old_resolved.zone_id, &old_resolved.path_in_zone)?;
        self.check_permission(context, "write", &new_resolved.zone_id, &new_resolved.path_in_zone)?;

        if old_resolved.zone_id == new_resolved.zone_id {
            let store = self.zones.zone(&old_resolved.zone_id)?;
            let outcome = store.rename(&old_resolved.path_in_zone, &new_resolved.path_in_zone, context.subject_key().as_str())?;
            self.emit(&old_resolved.zone_id, outcome.revision, new_resolved.path_in_zone.as_str(), ChangeEventType::Rename, context.subject_key().as_str());
            Ok(outcome.metadata)
        } else {
            let (meta, bytes) = self.read(old, context)?;
            let written = self.write(new, &bytes, context, None, Some("*"))?;
            self.delete(old, context)?;
            tracing::warn!(%old, %new, "cross-zone rename executed as best-effort copy-then-delete");
            let _ = meta;
            Ok(written)
        }
    }

    pub fn copy(&self, src: &str, dst: &str, context: &OperationContext) -> Result<FileMetadata> {
        let (_, bytes) = self.read(src, context)?;
        self.write(dst, &bytes, context, None, None)
    }

    /// Creates missing ancestors idempotently when `parents` is set.
    pub fn mkdir(&self, path: &str, context: &OperationContext, parents: bool, exist_ok: bool) -> Result<FileMetadata> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "write", &resolved.zone_id, &resolved.path_in_zone)?;
        let store = self.zones.zone(&resolved.zone_id)?;

        if parents {
            let mut ancestors = resolved.path_in_zone.ancestors_inclusive();
            ancestors.reverse();
            for ancestor in &ancestors[..ancestors.len().saturating_sub(1)] {
                if !store.exists(ancestor)? {
                    self.create_dir_entry(&store, ancestor, context)?;
                }
            }
        }

        if store.exists(&resolved.path_in_zone)? {
            if exist_ok {
                return Ok(store.get(&resolved.path_in_zone)?.expect("checked exists"));
            }
            return Err(NexusError::AlreadyExists(path.to_string()));
        }
        let (meta, revision) = self.create_dir_entry(&store, &resolved.path_in_zone, context)?;
        self.emit(&resolved.zone_id, revision, resolved.path_in_zone.as_str(), ChangeEventType::Mkdir, context.subject_key().as_str());
        Ok(meta)
    }

    fn create_dir_entry(&self, store: &crate::metadata::store::MetadataStore, path: &NormalizedPath, context: &OperationContext) -> Result<(FileMetadata, u64)> {
        let now = now_millis();
        let meta = FileMetadata {
            path: path.to_string(),
            entry_type: EntryType::Dir,
            backend_name: "local".to_owned(),
            physical_path: path.to_string(),
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
        let outcome = store.put(meta, None, Some("*"), context.subject_key().as_str(), OperationType::Mkdir)?;
        Ok((outcome.metadata, outcome.revision))
    }

    /// Fails if the target contains entries unless `recursive`, in which
    /// case descendants are deleted and their content hashes released.
    pub fn rmdir(&self, path: &str, context: &OperationContext, recursive: bool) -> Result<()> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "write", &resolved.zone_id, &resolved.path_in_zone)?;
        let store = self.zones.zone(&resolved.zone_id)?;

        let meta = store
            .get(&resolved.path_in_zone)?
            .ok_or_else(|| NexusError::NotFound(path.to_string()))?;
        if meta.entry_type != EntryType::Dir {
            return Err(NexusError::Usage(format!("{path} is not a directory")));
        }

        let (children, _) = store.list(&resolved.path_in_zone, true, None, None)?;
        let children: Vec<_> = children.into_iter().filter(|c| c.path != resolved.path_in_zone.as_str()).collect();
        if !children.is_empty() && !recursive {
            return Err(NexusError::PreconditionFailed(format!("{path} is not empty")));
        }
        for child in &children {
            if child.entry_type == EntryType::Reg {
                self.cas.release(&child.etag)?;
            }
            store.delete(&NormalizedPath::parse(&child.path)?, context.subject_key().as_str())?;
        }
        let revision = store.delete(&resolved.path_in_zone, context.subject_key().as_str())?;
        self.emit(&resolved.zone_id, revision, resolved.path_in_zone.as_str(), ChangeEventType::Rmdir, context.subject_key().as_str());
        Ok(())
    }

    pub fn exists(&self, path: &str, context: &OperationContext) -> Result<bool> {
        match self.get_metadata(path, context) {
            Ok(_) => Ok(true),
            Err(NexusError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn is_directory(&self, path: &str, context: &OperationContext) -> Result<bool> {
        Ok(self.get_metadata(path, context)?.entry_type == EntryType::Dir)
    }

    pub fn get_metadata(&self, path: &str, context: &OperationContext) -> Result<FileMetadata> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "read", &resolved.zone_id, &resolved.path_in_zone)?;
        let store = self.zones.zone(&resolved.zone_id)?;
        store.get(&resolved.path_in_zone)?.ok_or_else(|| NexusError::NotFound(path.to_string()))
    }

    /// List never fails on permission: denied entries are simply omitted
    /// (spec.md §7). Candidates are listed from metadata, then run through
    /// `filter_permitted`, which consults Tiger's bitmap intersection
    /// before falling back to a per-object `check` (spec.md §4.6/§4.5.4).
    pub fn list(&self, path: &str, context: &OperationContext, recursive: bool, limit: Option<usize>, cursor: Option<&str>) -> Result<(Vec<FileMetadata>, Option<String>)> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        let store = self.zones.zone(&resolved.zone_id)?;
        let (candidates, next_cursor) = store.list(&resolved.path_in_zone, recursive, cursor, limit)?;

        if context.is_admin() && self.config.admins_bypass_permissions {
            return Ok((candidates, next_cursor));
        }

        let subject_entity = Entity::new(context.subject_type(), context.subject_id());
        let mut by_path: BTreeMap<String, FileMetadata> =
            candidates.into_iter().map(|meta| (meta.path.clone(), meta)).collect();
        let objects: Vec<Entity> = by_path.keys().map(|p| Entity::new("file", p.as_str())).collect();
        let permitted = self.enforcer.filter_permitted(&subject_entity, "read", objects, &resolved.zone_id)?;

        let allowed = permitted
            .into_iter()
            .filter_map(|object| by_path.remove(&object.id))
            .collect();
        Ok((allowed, next_cursor))
    }

    /// Shell-style glob (`*`, `?`) over the listed namespace under `path`'s
    /// parent directory.
    pub fn glob(&self, pattern: &str, context: &OperationContext) -> Result<Vec<FileMetadata>> {
        let pattern_path = NormalizedPath::parse(pattern)?;
        let search_root = pattern_path.parent().unwrap_or_else(NormalizedPath::root);
        let (candidates, _) = self.list(search_root.as_str(), context, true, None, None)?;
        Ok(candidates.into_iter().filter(|m| glob_match(pattern, &m.path)).collect())
    }

    /// Substring search over readable file contents under `path`.
    pub fn grep(&self, path: &str, needle: &str, context: &OperationContext) -> Result<Vec<(String, usize)>> {
        let (candidates, _) = self.list(path, context, true, None, None)?;
        let mut hits = Vec::new();
        for meta in candidates {
            if meta.entry_type != EntryType::Reg {
                continue;
            }
            if let Ok(bytes) = self.cas.read_blob(&meta.etag, false) {
                if let Ok(text) = std::str::from_utf8(&bytes) {
                    let count = text.matches(needle).count();
                    if count > 0 {
                        hits.push((meta.path, count));
                    }
                }
            }
        }
        Ok(hits)
    }

    pub fn list_versions(&self, path: &str, context: &OperationContext, cursor: Option<u64>) -> Result<Vec<VersionRecord>> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "read", &resolved.zone_id, &resolved.path_in_zone)?;
        let store = self.zones.zone(&resolved.zone_id)?;
        store.list_versions(&resolved.path_in_zone, cursor)
    }

    pub fn get_version(&self, path: &str, context: &OperationContext, version: u64) -> Result<Option<VersionRecord>> {
        let path = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&path)?;
        self.check_permission(context, "read", &resolved.zone_id, &resolved.path_in_zone)?;
        let store = self.zones.zone(&resolved.zone_id)?;
        store.get_version(&resolved.path_in_zone, version)
    }

    pub fn diff_versions(&self, path: &str, context: &OperationContext, v1: u64, v2: u64) -> Result<VersionDiff> {
        let a = self
            .get_version(path, context, v1)?
            .ok_or_else(|| NexusError::NotFound(format!("{path}@{v1}")))?;
        let b = self
            .get_version(path, context, v2)?
            .ok_or_else(|| NexusError::NotFound(format!("{path}@{v2}")))?;
        Ok(crate::metadata::version::diff(&a, &b))
    }

    /// Creates a new version pointing at an older content hash
    /// (`source_type = rollback`, `rollback_from = v`), then writes that
    /// content back as the current state (spec.md §8 scenario S3).
    pub fn rollback(&self, path: &str, context: &OperationContext, version: u64) -> Result<FileMetadata> {
        let target = self
            .get_version(path, context, version)?
            .ok_or_else(|| NexusError::NotFound(format!("{path}@{version}")))?;
        let bytes = self.cas.read_blob(&target.content_hash, true)?;

        let normalised = NormalizedPath::parse(path)?;
        let resolved = self.zones.resolve(&normalised)?;
        self.check_permission(context, "write", &resolved.zone_id, &resolved.path_in_zone)?;
        let store = self.zones.zone(&resolved.zone_id)?;
        let previous = store.get(&resolved.path_in_zone)?;

        self.cas.store(&target.content_hash, &bytes, BTreeMap::new())?;
        let now = now_millis();
        let meta = FileMetadata {
            path: resolved.path_in_zone.to_string(),
            entry_type: EntryType::Reg,
            backend_name: "local".to_owned(),
            physical_path: resolved.path_in_zone.to_string(),
            size: target.size,
            etag: target.content_hash.clone(),
            mime_type: previous.as_ref().map(|p| p.mime_type.clone()).unwrap_or_else(|| "application/octet-stream".to_owned()),
            created_at: previous.as_ref().map(|p| p.created_at).unwrap_or(now),
            modified_at: now,
            version: 0,
            i_links_count: 1,
            target_zone_id: None,
            custom_metadata: previous.as_ref().map(|p| p.custom_metadata.clone()).unwrap_or_default(),
        };
        let outcome = store.put(meta, None, None, context.subject_key().as_str(), OperationType::Write)?;
        store.create_version(
            &resolved.path_in_zone,
            &target.content_hash,
            target.size,
            context.subject_key().as_str(),
            SourceType::Rollback,
            Some(version),
        )?;
        if let Some(prev) = previous {
            if prev.etag != target.content_hash {
                self.cas.release(&prev.etag)?;
            }
        }
        self.emit(&resolved.zone_id, outcome.revision, resolved.path_in_zone.as_str(), ChangeEventType::Write, context.subject_key().as_str());
        Ok(outcome.metadata)
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn helper(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => helper(&p[1..], c) || (!c.is_empty() && helper(p, &c[1..])),
            (Some(b'?'), Some(_)) => helper(&p[1..], &c[1..]),
            (Some(pc), Some(cc)) if pc == cc => helper(&p[1..], &c[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryEventSink;
    use nexus_rebac::{ObjectNamespace, RebacConfig, RebacEngine, Rewrite, Tuple};

    fn test_kernel() -> (Kernel, Arc<RebacEngine>, tempfile::TempDir) {
        let sled_db = sled::Config::new().temporary(true).open().unwrap();
        let zones = Arc::new(ZoneManager::new(sled_db, ZoneId::from("root")).unwrap());
        let cas_dir = tempfile::tempdir().unwrap();
        let cas = Arc::new(CasStore::new(cas_dir.path(), false, 64).unwrap());

        let mut rebac = RebacEngine::new(RebacConfig::default());
        rebac
            .register_namespace(
                "file",
                ObjectNamespace::new()
                    .with_relation("owner", Rewrite::Direct)
                    .with_relation("write", Rewrite::Union(vec!["owner".to_owned()]))
                    .with_relation("read", Rewrite::Union(vec!["owner".to_owned()])),
            )
            .unwrap();
        let rebac = Arc::new(rebac);

        let kernel = Kernel::new(
            zones,
            cas,
            rebac.clone(),
            Arc::new(InMemoryEventSink::new()),
            None,
            KernelConfig::default(),
        );
        (kernel, rebac, cas_dir)
    }

    fn grant_owner(rebac: &RebacEngine, subject: &str, path: &str) {
        rebac.write(Tuple::new(
            Subject::new(Entity::new("user", subject)),
            "owner",
            Entity::new("file", path),
            ZoneId::from("root"),
        ));
    }

    fn ctx(subject: &str) -> OperationContext {
        OperationContext::new("user", subject, ZoneId::from("root"))
    }

    #[test]
    fn write_then_read_round_trips() {
        let (kernel, rebac, _dir) = test_kernel();
        grant_owner(&rebac, "alice", "/a");
        kernel.write("/a", b"hello", &ctx("alice"), None, None).unwrap();
        let (_meta, bytes) = kernel.read("/a", &ctx("alice")).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn write_without_permission_is_denied() {
        let (kernel, _rebac, _dir) = test_kernel();
        let err = kernel.write("/a", b"hello", &ctx("mallory"), None, None).unwrap_err();
        assert!(matches!(err, NexusError::PermissionDenied { .. }));
    }

    #[test]
    fn rewrite_dedups_blob_and_releases_stale_hash() {
        let (kernel, rebac, _dir) = test_kernel();
        grant_owner(&rebac, "alice", "/a");
        grant_owner(&rebac, "alice", "/b");
        kernel.write("/a", b"X", &ctx("alice"), None, None).unwrap();
        kernel.write("/b", b"X", &ctx("alice"), None, None).unwrap();
        let hash_x = hash_content(b"X");
        assert!(kernel.cas.blob_exists(&hash_x).unwrap());

        kernel.write("/a", b"Y", &ctx("alice"), None, None).unwrap();
        let hash_y = hash_content(b"Y");
        assert!(kernel.cas.blob_exists(&hash_x).unwrap(), "b still references X");
        assert!(kernel.cas.blob_exists(&hash_y).unwrap());
    }

    #[test]
    fn versioning_and_rollback() {
        let (kernel, rebac, _dir) = test_kernel();
        grant_owner(&rebac, "alice", "/a");
        kernel.write("/a", b"v1", &ctx("alice"), None, None).unwrap();
        kernel.write("/a", b"v2", &ctx("alice"), None, None).unwrap();
        let versions = kernel.list_versions("/a", &ctx("alice"), None).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_number, 2);

        kernel.rollback("/a", &ctx("alice"), 1).unwrap();
        let (_, bytes) = kernel.read("/a", &ctx("alice")).unwrap();
        assert_eq!(bytes, b"v1");
        let versions = kernel.list_versions("/a", &ctx("alice"), None).unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].source_type, SourceType::Rollback);
    }

    #[test]
    fn mkdir_parents_then_rmdir_recursive() {
        let (kernel, rebac, _dir) = test_kernel();
        grant_owner(&rebac, "alice", "/a/b/c");
        grant_owner(&rebac, "alice", "/a");
        grant_owner(&rebac, "alice", "/a/b");
        kernel.mkdir("/a/b/c", &ctx("alice"), true, false).unwrap();
        assert!(kernel.is_directory("/a/b/c", &ctx("alice")).unwrap());
        let err = kernel.rmdir("/a", &ctx("alice"), false).unwrap_err();
        assert!(matches!(err, NexusError::PreconditionFailed(_)));
        kernel.rmdir("/a", &ctx("alice"), true).unwrap();
        assert!(!kernel.exists("/a", &ctx("alice")).unwrap());
    }

    #[test]
    fn list_omits_denied_entries_without_failing() {
        let (kernel, rebac, _dir) = test_kernel();
        grant_owner(&rebac, "alice", "/a");
        kernel.write("/a", b"visible", &ctx("alice"), None, None).unwrap();
        let (entries, _) = kernel.list("/", &ctx("mallory"), true, None, None).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn list_uses_tiger_fast_path_for_a_direct_read_grant() {
        let (kernel, rebac, _dir) = test_kernel();
        grant_owner(&rebac, "alice", "/a");
        kernel.write("/a", b"visible", &ctx("alice"), None, None).unwrap();
        rebac.write(Tuple::new(
            Subject::new(Entity::new("user", "alice")),
            "read",
            Entity::new("file", "/a"),
            ZoneId::from("root"),
        ));
        let hits = rebac.tiger.intersect(
            &ZoneId::from("root"),
            &Subject::new(Entity::new("user", "alice")),
            "read",
            "file",
            &["/a".to_string()],
        );
        assert_eq!(hits, vec!["/a".to_string()], "tiger should have materialised the direct read grant");

        let (entries, _) = kernel.list("/", &ctx("alice"), true, None, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/a");
    }

    #[test]
    fn glob_matches_wildcard_suffix() {
        let (kernel, rebac, _dir) = test_kernel();
        grant_owner(&rebac, "alice", "/a.txt");
        grant_owner(&rebac, "alice", "/b.rs");
        kernel.write("/a.txt", b"1", &ctx("alice"), None, None).unwrap();
        kernel.write("/b.rs", b"2", &ctx("alice"), None, None).unwrap();
        let hits = kernel.glob("/*.txt", &ctx("alice")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/a.txt");
    }
}
