//! Overlay resolver (spec.md §4.4 `OverlayResolver`/`WorkspaceManifest`),
//! grounded on `examples/original_source/tests/integration/test_overlay_workspace.py`
//! (`OverlayResolver.{resolve_read,list_overlay,create_whiteout,flatten}`,
//! `WorkspaceManifest`, `is_whiteout`). An overlay never mutates its base
//! manifest; the upper layer lives in an ordinary zone-scoped
//! `MetadataStore`.

use std::collections::BTreeMap;

use crate::error::{NexusError, Result};
use crate::metadata::oplog::OperationType;
use crate::metadata::store::{EntryType, FileMetadata, MetadataStore};
use crate::path::NormalizedPath;

/// Reserved mime type marking an upper-layer entry as hiding a base entry
/// (spec.md §6 "Reserved mime types").
pub const WHITEOUT_MIME_TYPE: &str = "application/x-nexus-whiteout";

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ManifestEntry {
    pub content_hash: String,
    pub size: u64,
    pub mime_type: String,
}

/// Immutable base for overlays: `relative_path → (content_hash, size, mime_type)`.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkspaceManifest {
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl WorkspaceManifest {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("WorkspaceManifest serialises")
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

pub struct OverlayConfig {
    pub workspace_path: NormalizedPath,
    pub base_manifest: WorkspaceManifest,
}

pub struct OverlayResolver<'a> {
    upper: &'a MetadataStore,
}

impl<'a> OverlayResolver<'a> {
    pub fn new(upper: &'a MetadataStore) -> Self {
        Self { upper }
    }

    pub fn is_whiteout(meta: &FileMetadata) -> bool {
        meta.mime_type == WHITEOUT_MIME_TYPE
    }

    fn relative_to_workspace<'p>(&self, path: &'p NormalizedPath, config: &OverlayConfig) -> Result<String> {
        let ws = config.workspace_path.as_str();
        let p = path.as_str();
        if p == ws {
            return Ok(String::new());
        }
        p.strip_prefix(ws)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_owned)
            .ok_or_else(|| NexusError::Usage(format!("{p} is outside overlay workspace {ws}")))
    }

    fn synthesize_from_base(&self, path: &NormalizedPath, relative: &str, config: &OverlayConfig) -> Option<FileMetadata> {
        let entry = config.base_manifest.entries.get(relative)?;
        let now = crate::metadata::store::now_millis();
        Some(FileMetadata {
            path: path.to_string(),
            entry_type: EntryType::Reg,
            backend_name: "overlay-base".to_owned(),
            physical_path: path.to_string(),
            size: entry.size,
            etag: entry.content_hash.clone(),
            mime_type: entry.mime_type.clone(),
            created_at: now,
            modified_at: now,
            version: 0,
            i_links_count: 1,
            target_zone_id: None,
            custom_metadata: Default::default(),
        })
    }

    /// First the upper store, then a synthesised view of the base manifest
    /// (spec.md §4.4).
    pub fn resolve_read(&self, path: &NormalizedPath, config: &OverlayConfig) -> Result<Option<FileMetadata>> {
        if let Some(meta) = self.upper.get(path)? {
            if Self::is_whiteout(&meta) {
                return Ok(None);
            }
            return Ok(Some(meta));
        }
        let relative = self.relative_to_workspace(path, config)?;
        Ok(self.synthesize_from_base(path, &relative, config))
    }

    pub fn create_whiteout(&self, path: &NormalizedPath, actor: &str) -> Result<()> {
        let now = crate::metadata::store::now_millis();
        let whiteout = FileMetadata {
            path: path.to_string(),
            entry_type: EntryType::Reg,
            backend_name: "overlay-upper".to_owned(),
            physical_path: path.to_string(),
            size: 0,
            etag: String::new(),
            mime_type: WHITEOUT_MIME_TYPE.to_owned(),
            created_at: now,
            modified_at: now,
            version: 0,
            i_links_count: 1,
            target_zone_id: None,
            custom_metadata: Default::default(),
        };
        self.upper.put(whiteout, None, None, actor, OperationType::Delete)?;
        Ok(())
    }

    fn synthesize_dir(&self, path: &NormalizedPath) -> FileMetadata {
        let now = crate::metadata::store::now_millis();
        FileMetadata {
            path: path.to_string(),
            entry_type: EntryType::Dir,
            backend_name: "overlay-synthetic".to_owned(),
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
        }
    }

    /// Union of upper entries (excluding whiteouts) and base entries whose
    /// upper counterpart is absent or not a whiteout (spec.md §4.4).
    /// Directory emission follows the union semantics: every distinct
    /// ancestor directory of an emitted file gets its own synthesised
    /// `Dir` entry, so a listing of "/" over `{src/a.py}` yields both
    /// `src/a.py` and `src/` the way a real filesystem listing would.
    pub fn list_overlay(&self, config: &OverlayConfig) -> Result<Vec<FileMetadata>> {
        let (upper_entries, _) = self.upper.list(&config.workspace_path, true, None, None)?;
        let mut seen_relative = std::collections::BTreeSet::new();
        let mut out = Vec::new();

        for meta in &upper_entries {
            let path = NormalizedPath::parse(&meta.path)?;
            let relative = self.relative_to_workspace(&path, config)?;
            seen_relative.insert(relative);
            if !Self::is_whiteout(meta) {
                out.push(meta.clone());
            }
        }

        for (relative, _entry) in &config.base_manifest.entries {
            if seen_relative.contains(relative) {
                continue;
            }
            let path = config.workspace_path.join(relative)?;
            if let Some(meta) = self.synthesize_from_base(&path, relative, config) {
                out.push(meta);
            }
        }

        let mut seen_dirs = std::collections::BTreeSet::new();
        let mut dir_entries = Vec::new();
        for meta in &out {
            let path = NormalizedPath::parse(&meta.path)?;
            let relative = self.relative_to_workspace(&path, config)?;
            for ancestor in ancestor_relative_dirs(&relative) {
                if seen_dirs.insert(ancestor.clone()) {
                    let dir_path = config.workspace_path.join(&ancestor)?;
                    dir_entries.push(self.synthesize_dir(&dir_path));
                }
            }
        }
        out.extend(dir_entries);

        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    /// Emits a new `WorkspaceManifest` from the effective merged view and
    /// clears the upper store (spec.md §4.4). Does not mutate `config`'s
    /// base manifest. Synthesised directory entries are not part of the
    /// manifest — it only ever maps file relative paths to content.
    pub fn flatten(&self, config: &OverlayConfig, actor: &str) -> Result<WorkspaceManifest> {
        let effective = self.list_overlay(config)?;
        let mut entries = BTreeMap::new();
        for meta in &effective {
            if meta.entry_type == EntryType::Dir {
                continue;
            }
            let path = NormalizedPath::parse(&meta.path)?;
            let relative = self.relative_to_workspace(&path, config)?;
            entries.insert(
                relative,
                ManifestEntry {
                    content_hash: meta.etag.clone(),
                    size: meta.size,
                    mime_type: meta.mime_type.clone(),
                },
            );
        }

        let (upper_entries, _) = self.upper.list(&config.workspace_path, true, None, None)?;
        for meta in &upper_entries {
            let path = NormalizedPath::parse(&meta.path)?;
            self.upper.delete(&path, actor)?;
        }

        Ok(WorkspaceManifest { entries })
    }
}

/// Strict-prefix ancestor directories of a relative file path, e.g.
/// `"a/b/c.py"` -> `["a", "a/b"]`. Empty for a top-level file.
fn ancestor_relative_dirs(relative: &str) -> Vec<String> {
    let parts: Vec<&str> = relative.split('/').collect();
    (1..parts.len()).map(|i| parts[..i].join("/")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_rebac::ZoneId;

    fn upper() -> (MetadataStore, sled::Db) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        (MetadataStore::open(&db, ZoneId::from("ws")).unwrap(), db)
    }

    fn base_config() -> OverlayConfig {
        let mut entries = BTreeMap::new();
        entries.insert(
            "src/a.py".to_owned(),
            ManifestEntry { content_hash: "hash_a".to_owned(), size: 100, mime_type: "text/x-python".to_owned() },
        );
        entries.insert(
            "README".to_owned(),
            ManifestEntry { content_hash: "hash_r".to_owned(), size: 10, mime_type: "text/markdown".to_owned() },
        );
        OverlayConfig {
            workspace_path: NormalizedPath::parse("/ws/agent-a").unwrap(),
            base_manifest: WorkspaceManifest { entries },
        }
    }

    #[test]
    fn reads_through_to_base_layer() {
        let (upper, _db) = upper();
        let resolver = OverlayResolver::new(&upper);
        let config = base_config();
        let path = NormalizedPath::parse("/ws/agent-a/src/a.py").unwrap();
        let meta = resolver.resolve_read(&path, &config).unwrap().unwrap();
        assert_eq!(meta.etag, "hash_a");
    }

    #[test]
    fn whiteout_hides_base_entry() {
        let (upper, _db) = upper();
        let resolver = OverlayResolver::new(&upper);
        let config = base_config();
        let path = NormalizedPath::parse("/ws/agent-a/README").unwrap();
        resolver.create_whiteout(&path, "agent-a").unwrap();
        assert!(resolver.resolve_read(&path, &config).unwrap().is_none());
    }

    #[test]
    fn list_overlay_unions_upper_and_base_excluding_whiteouts() {
        let (upper, _db) = upper();
        let resolver = OverlayResolver::new(&upper);
        let config = base_config();
        resolver.create_whiteout(&NormalizedPath::parse("/ws/agent-a/README").unwrap(), "agent-a").unwrap();
        let listed = resolver.list_overlay(&config).unwrap();
        let paths: Vec<_> = listed.iter().map(|m| m.path.clone()).collect();
        assert_eq!(
            paths,
            vec!["/ws/agent-a/src".to_owned(), "/ws/agent-a/src/a.py".to_owned()]
        );
        let dir = listed.iter().find(|m| m.path == "/ws/agent-a/src").unwrap();
        assert_eq!(dir.entry_type, EntryType::Dir);
    }

    #[test]
    fn flatten_produces_manifest_without_whiteout_and_clears_upper() {
        let (upper, _db) = upper();
        let resolver = OverlayResolver::new(&upper);
        let config = base_config();
        resolver.create_whiteout(&NormalizedPath::parse("/ws/agent-a/README").unwrap(), "agent-a").unwrap();
        let flattened = resolver.flatten(&config, "agent-a").unwrap();
        assert!(flattened.entries.contains_key("src/a.py"));
        assert!(!flattened.entries.contains_key("README"));
        let (remaining, _) = upper.list(&config.workspace_path, true, None, None).unwrap();
        assert!(remaining.is_empty());
    }
}
