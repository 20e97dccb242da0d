//! Version history (spec.md §3 `VersionRecord`, §4.2 version operations).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SourceType {
    Original,
    Update,
    Rollback,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionRecord {
    pub resource_id: String,
    pub version_number: u64,
    pub content_hash: String,
    pub size: u64,
    pub author: String,
    pub created_at: u64,
    pub source_type: SourceType,
    pub rollback_from: Option<u64>,
}

impl VersionRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("VersionRecord serialises")
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Field-level diff between two versions' metadata (spec.md §4.2
/// `diff_versions`, non-content-level mode).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionDiff {
    pub size_changed: bool,
    pub hash_changed: bool,
    pub old: VersionSummary,
    pub new: VersionSummary,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionSummary {
    pub version_number: u64,
    pub content_hash: String,
    pub size: u64,
    pub created_at: u64,
}

impl From<&VersionRecord> for VersionSummary {
    fn from(v: &VersionRecord) -> Self {
        Self {
            version_number: v.version_number,
            content_hash: v.content_hash.clone(),
            size: v.size,
            created_at: v.created_at,
        }
    }
}

pub fn diff(v1: &VersionRecord, v2: &VersionRecord) -> VersionDiff {
    VersionDiff {
        size_changed: v1.size != v2.size,
        hash_changed: v1.content_hash != v2.content_hash,
        old: v1.into(),
        new: v2.into(),
    }
}
