//! Operation log (spec.md §3 `OperationLogEntry`/`ZoneVersionSequence`):
//! a monotone per-zone sequence of committed mutations, appended inside the
//! same transaction as the state change it describes (spec.md §4.2).

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum OperationType {
    Write,
    Delete,
    Rename,
    Mkdir,
    Rmdir,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Write => "WRITE",
            Self::Delete => "DELETE",
            Self::Rename => "RENAME",
            Self::Mkdir => "MKDIR",
            Self::Rmdir => "RMDIR",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub sequence: u64,
    pub zone_id: String,
    pub operation_type: OperationType,
    pub path: String,
    pub actor: String,
    pub revision: u64,
    pub timestamp: u64,
}

impl OperationLogEntry {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("OperationLogEntry serialises")
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
