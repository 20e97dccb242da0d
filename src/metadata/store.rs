//! Path→metadata store (spec.md §3 `FileMetadata`, §4.2). One zone is one
//! independent `sled::Tree`, grounded on the teacher's tree-per-concern
//! layout (`crdt/src/doc.rs`'s `db.open_tree("store")`/`db.open_tree("acl")`),
//! generalised here to one tree per zone rather than one per CRDT concern.
//!
//! Key layout within a zone's tree (sled trees keep keys in byte-lexical
//! order, which we rely on for prefix scans and version ordering):
//! - `m<path>`            → serialised `FileMetadata`
//! - `v<path>\0<20-digit version>` → serialised `VersionRecord`
//! - `o<20-digit sequence>` → serialised `OperationLogEntry`
//! - `$revision`          → current zone revision (big-endian u64)
//! - `$opseq`             → next operation-log sequence (big-endian u64)
//! - `$vc<path>`          → highest version number issued for `path`

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use nexus_rebac::ZoneId;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use serde::{Deserialize, Serialize};

use crate::config::ResiliencyConfig;
use crate::error::{NexusError, Result};
use crate::metadata::oplog::{OperationLogEntry, OperationType};
use crate::metadata::version::{SourceType, VersionRecord};
use crate::path::NormalizedPath;
use crate::resiliency::ResiliencyPolicy;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum EntryType {
    Reg,
    Dir,
    Mount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    pub entry_type: EntryType,
    pub backend_name: String,
    pub physical_path: String,
    pub size: u64,
    pub etag: String,
    pub mime_type: String,
    pub created_at: u64,
    pub modified_at: u64,
    pub version: u64,
    pub i_links_count: u32,
    pub target_zone_id: Option<String>,
    #[serde(default)]
    pub custom_metadata: std::collections::BTreeMap<String, serde_json::Value>,
}

impl FileMetadata {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("FileMetadata serialises")
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

#[derive(Clone, Debug)]
pub struct WriteOutcome {
    pub metadata: FileMetadata,
    pub revision: u64,
}

pub struct MetadataStore {
    zone_id: ZoneId,
    tree: sled::Tree,
    policy: Arc<ResiliencyPolicy>,
}

const REVISION_KEY: &[u8] = b"$revision";
const OPSEQ_KEY: &[u8] = b"$opseq";

impl MetadataStore {
    pub fn open(db: &sled::Db, zone_id: ZoneId) -> Result<Self> {
        Self::open_with_resiliency(db, zone_id, Arc::new(ResiliencyPolicy::new("metadata-store", ResiliencyConfig::default())))
    }

    pub fn open_with_resiliency(db: &sled::Db, zone_id: ZoneId, policy: Arc<ResiliencyPolicy>) -> Result<Self> {
        let tree = db.open_tree(format!("zone:{zone_id}"))?;
        Ok(Self { zone_id, tree, policy })
    }

    pub fn zone_id(&self) -> &ZoneId {
        &self.zone_id
    }

    fn meta_key(path: &NormalizedPath) -> Vec<u8> {
        format!("m{path}").into_bytes()
    }

    fn version_key(path: &NormalizedPath, version: u64) -> Vec<u8> {
        format!("v{path}\0{version:020}").into_bytes()
    }

    fn version_counter_key(path: &NormalizedPath) -> Vec<u8> {
        format!("$vc{path}").into_bytes()
    }

    fn oplog_key(sequence: u64) -> Vec<u8> {
        format!("o{sequence:020}").into_bytes()
    }

    pub fn current_revision(&self) -> Result<u64> {
        self.policy.call_blocking(|| Ok(read_u64(&self.tree.get(REVISION_KEY).map_err(NexusError::from)?)))
    }

    pub fn get(&self, path: &NormalizedPath) -> Result<Option<FileMetadata>> {
        self.policy.call_blocking(|| match self.tree.get(Self::meta_key(path)).map_err(NexusError::from)? {
            Some(bytes) => Ok(Some(FileMetadata::from_bytes(&bytes).map_err(|e| {
                NexusError::InvariantViolated(format!("corrupt metadata at {path}: {e}"))
            })?)),
            None => Ok(None),
        })
    }

    pub fn exists(&self, path: &NormalizedPath) -> Result<bool> {
        self.policy.call_blocking(|| Ok(self.tree.contains_key(Self::meta_key(path))?))
    }

    /// Atomic upsert honouring `if_match`/`if_none_match`, appends an
    /// operation-log entry and bumps the zone revision in the same
    /// transaction (spec.md §4.2 contract).
    pub fn put(
        &self,
        meta: FileMetadata,
        if_match: Option<&str>,
        if_none_match: Option<&str>,
        actor: &str,
        op: OperationType,
    ) -> Result<WriteOutcome> {
        let path = NormalizedPath::parse(&meta.path)?;
        let meta_key = Self::meta_key(&path);
        let zone_id = self.zone_id.0.clone();

        let (metadata, revision) = self.policy.call_blocking(|| {
            let result: std::result::Result<(FileMetadata, u64), TransactionError<NexusError>> =
                self.tree.transaction(|tx| {
                    let existing = tx.get(&meta_key)?;
                match (&existing, if_match, if_none_match) {
                    (Some(_), _, Some(_)) => {
                        return Err(ConflictableTransactionError::Abort(NexusError::PreconditionFailed(
                            format!("if_none_match failed: {} exists", path),
                        )))
                    }
                    (Some(bytes), Some(expected), _) => {
                        let current = FileMetadata::from_bytes(bytes)
                            .map_err(|e| ConflictableTransactionError::Abort(NexusError::InvariantViolated(e.to_string())))?;
                        if current.etag != expected {
                            return Err(ConflictableTransactionError::Abort(NexusError::PreconditionFailed(
                                format!("if_match failed for {}", path),
                            )));
                        }
                    }
                    (None, Some(_), _) => {
                        return Err(ConflictableTransactionError::Abort(NexusError::PreconditionFailed(
                            format!("if_match failed: {} does not exist", path),
                        )))
                    }
                    _ => {}
                }

                let revision = read_u64(&tx.get(REVISION_KEY)?) + 1;
                let sequence = read_u64(&tx.get(OPSEQ_KEY)?) + 1;
                let mut meta = meta.clone();
                meta.version = revision;
                let entry = OperationLogEntry {
                    sequence,
                    zone_id: zone_id.clone(),
                    operation_type: op,
                    path: path.to_string(),
                    actor: actor.to_owned(),
                    revision,
                    timestamp: now_millis(),
                };

                tx.insert(meta_key.clone(), meta.to_bytes())?;
                tx.insert(Self::oplog_key(sequence), entry.to_bytes())?;
                tx.insert(REVISION_KEY, revision.to_be_bytes().to_vec())?;
                tx.insert(OPSEQ_KEY, sequence.to_be_bytes().to_vec())?;
                    Ok((meta.clone(), revision))
                });

            unwrap_tx(result)
        })?;
        Ok(WriteOutcome { metadata, revision })
    }

    pub fn delete(&self, path: &NormalizedPath, actor: &str) -> Result<u64> {
        let meta_key = Self::meta_key(path);
        let zone_id = self.zone_id.0.clone();
        let path_str = path.to_string();

        self.policy.call_blocking(|| {
            let result: std::result::Result<u64, TransactionError<NexusError>> =
                self.tree.transaction(|tx| {
                    if tx.get(&meta_key)?.is_none() {
                        return Err(ConflictableTransactionError::Abort(NexusError::NotFound(path_str.clone())));
                    }
                    let revision = read_u64(&tx.get(REVISION_KEY)?) + 1;
                    let sequence = read_u64(&tx.get(OPSEQ_KEY)?) + 1;
                    let entry = OperationLogEntry {
                        sequence,
                        zone_id: zone_id.clone(),
                        operation_type: OperationType::Delete,
                        path: path_str.clone(),
                        actor: actor.to_owned(),
                        revision,
                        timestamp: now_millis(),
                    };
                    tx.remove(meta_key.clone())?;
                    tx.insert(Self::oplog_key(sequence), entry.to_bytes())?;
                    tx.insert(REVISION_KEY, revision.to_be_bytes().to_vec())?;
                    tx.insert(OPSEQ_KEY, sequence.to_be_bytes().to_vec())?;
                    Ok(revision)
                });
            unwrap_tx(result)
        })
    }

    /// Atomic on `(old, new)`: unlinks the old entry and inserts the new one
    /// in one commit (spec.md §4.2).
    pub fn rename(&self, old: &NormalizedPath, new: &NormalizedPath, actor: &str) -> Result<WriteOutcome> {
        let old_key = Self::meta_key(old);
        let new_key = Self::meta_key(new);
        let zone_id = self.zone_id.0.clone();
        let old_str = old.to_string();
        let new_str = new.to_string();

        let (metadata, revision) = self.policy.call_blocking(|| {
            let result: std::result::Result<(FileMetadata, u64), TransactionError<NexusError>> =
                self.tree.transaction(|tx| {
                    let existing = tx.get(&old_key)?.ok_or_else(|| {
                        ConflictableTransactionError::Abort(NexusError::NotFound(old_str.clone()))
                    })?;
                    if tx.get(&new_key)?.is_some() {
                        return Err(ConflictableTransactionError::Abort(NexusError::PreconditionFailed(format!(
                            "rename target exists: {new_str}"
                        ))));
                    }
                    let mut meta = FileMetadata::from_bytes(&existing).map_err(|e| {
                        ConflictableTransactionError::Abort(NexusError::InvariantViolated(e.to_string()))
                    })?;

                    let revision = read_u64(&tx.get(REVISION_KEY)?) + 1;
                    let sequence = read_u64(&tx.get(OPSEQ_KEY)?) + 1;
                    meta.path = new_str.clone();
                    meta.modified_at = now_millis();
                    meta.version = revision;

                    let entry = OperationLogEntry {
                        sequence,
                        zone_id: zone_id.clone(),
                        operation_type: OperationType::Rename,
                        path: new_str.clone(),
                        actor: actor.to_owned(),
                        revision,
                        timestamp: now_millis(),
                    };

                    tx.remove(old_key.clone())?;
                    tx.insert(new_key.clone(), meta.to_bytes())?;
                    tx.insert(Self::oplog_key(sequence), entry.to_bytes())?;
                    tx.insert(REVISION_KEY, revision.to_be_bytes().to_vec())?;
                    tx.insert(OPSEQ_KEY, sequence.to_be_bytes().to_vec())?;
                    Ok((meta.clone(), revision))
                });
            unwrap_tx(result)
        })?;
        Ok(WriteOutcome { metadata, revision })
    }

    /// Lists entries under `prefix`; when `recursive` is false, only direct
    /// children are returned. Cursor encodes the last-seen key, not an
    /// offset (spec.md §4.2 "pagination is stable under concurrent
    /// mutation").
    pub fn list(
        &self,
        prefix: &NormalizedPath,
        recursive: bool,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(Vec<FileMetadata>, Option<String>)> {
        let scan_start = match cursor {
            Some(c) => format!("m{c}\u{0}"),
            None => format!("m{prefix}"),
        };
        self.policy.call_blocking(|| {
            let mut out = Vec::new();
            let mut next_cursor = None;
            for kv in self.tree.range(scan_start.clone().into_bytes()..) {
                let (key, value) = kv?;
                let key_str = String::from_utf8_lossy(&key);
                if !key_str.starts_with('m') {
                    continue;
                }
                let path_str = &key_str[1..];
                if !(path_str == prefix.as_str() || prefix.is_ancestor_of(&NormalizedPath::parse(path_str)?)) {
                    break;
                }
                if !recursive {
                    let rel = path_str.strip_prefix(prefix.as_str()).unwrap_or(path_str);
                    let rel = rel.trim_start_matches('/');
                    if rel.contains('/') {
                        continue;
                    }
                }
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        next_cursor = Some(path_str.to_owned());
                        break;
                    }
                }
                out.push(FileMetadata::from_bytes(&value).map_err(|e| {
                    NexusError::InvariantViolated(format!("corrupt metadata at {path_str}: {e}"))
                })?);
            }
            Ok((out, next_cursor))
        })
    }

    pub fn create_version(
        &self,
        path: &NormalizedPath,
        content_hash: &str,
        size: u64,
        author: &str,
        source_type: SourceType,
        rollback_from: Option<u64>,
    ) -> Result<VersionRecord> {
        let counter_key = Self::version_counter_key(path);
        let path_str = path.to_string();
        let content_hash = content_hash.to_owned();
        let author = author.to_owned();

        self.policy.call_blocking(|| {
            let result: std::result::Result<VersionRecord, TransactionError<NexusError>> =
                self.tree.transaction(|tx| {
                    let version_number = read_u64(&tx.get(&counter_key)?) + 1;
                    let record = VersionRecord {
                        resource_id: path_str.clone(),
                        version_number,
                        content_hash: content_hash.clone(),
                        size,
                        author: author.clone(),
                        created_at: now_millis(),
                        source_type,
                        rollback_from,
                    };
                    tx.insert(Self::version_key(path, version_number), record.to_bytes())?;
                    tx.insert(counter_key.clone(), version_number.to_be_bytes().to_vec())?;
                    Ok(record)
                });
            unwrap_tx(result)
        })
    }

    pub fn get_version(&self, path: &NormalizedPath, version: u64) -> Result<Option<VersionRecord>> {
        self.policy.call_blocking(|| match self.tree.get(Self::version_key(path, version))? {
            Some(bytes) => Ok(Some(VersionRecord::from_bytes(&bytes).map_err(|e| {
                NexusError::InvariantViolated(format!("corrupt version record: {e}"))
            })?)),
            None => Ok(None),
        })
    }

    /// Strictly decreasing by version number (spec.md §4.2 invariant).
    pub fn list_versions(&self, path: &NormalizedPath, cursor: Option<u64>) -> Result<Vec<VersionRecord>> {
        let prefix = format!("v{path}\0");
        self.policy.call_blocking(|| {
            let mut versions = Vec::new();
            for kv in self.tree.scan_prefix(prefix.clone().into_bytes()) {
                let (_, value) = kv?;
                let record = VersionRecord::from_bytes(&value)
                    .map_err(|e| NexusError::InvariantViolated(format!("corrupt version record: {e}")))?;
                if cursor.map(|c| record.version_number < c).unwrap_or(true) {
                    versions.push(record);
                }
            }
            versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
            Ok(versions)
        })
    }
}

fn read_u64(value: &Option<sled::IVec>) -> u64 {
    value
        .as_ref()
        .and_then(|v| v.as_ref().try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

fn unwrap_tx<T>(result: std::result::Result<T, TransactionError<NexusError>>) -> Result<T> {
    result.map_err(NexusError::from)
}

impl From<TransactionError<NexusError>> for NexusError {
    fn from(e: TransactionError<NexusError>) -> Self {
        match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(e) => NexusError::from(e),
        }
    }
}
