//! CAS sidecar metadata (spec.md §3 `CASMeta`), grounded on the
//! `CASMeta`/`to_dict`/`from_dict` shape of
//! `examples/original_source/src/nexus/backends/cas_blob_store.py`, adapted
//! to an ordered-extras Rust struct serialised as JSON.

use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CasMeta {
    pub ref_count: u64,
    pub size: u64,
    /// Ordered extension key-value pairs (spec.md §3 invariant on `CASMeta`).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CasMeta {
    pub fn new(size: u64, extra: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            ref_count: 1,
            size,
            extra,
        }
    }

    pub fn is_zeroed(&self) -> bool {
        self.ref_count == 0 && self.size == 0 && self.extra.is_empty()
    }

    pub fn inc_ref(&self) -> Self {
        Self {
            ref_count: self.ref_count + 1,
            size: self.size,
            extra: self.extra.clone(),
        }
    }

    pub fn dec_ref(&self) -> Self {
        Self {
            ref_count: self.ref_count.saturating_sub(1),
            size: self.size,
            extra: self.extra.clone(),
        }
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CasMeta serialises")
    }

    pub fn from_json_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let mut extra = BTreeMap::new();
        extra.insert("is_chunk".to_string(), serde_json::Value::Bool(true));
        let meta = CasMeta::new(42, extra);
        let bytes = meta.to_json_bytes();
        let back = CasMeta::from_json_bytes(&bytes).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn default_is_zeroed() {
        assert!(CasMeta::default().is_zeroed());
    }
}
