//! Core configuration. Loaded from TOML at startup; immutable once built,
//! mirroring the frozen-dataclass config style of
//! `examples/original_source/src/nexus/core/resiliency.py` translated into
//! `serde`-derived structs.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    /// Root directory for CAS blobs and the metadata sled database.
    pub data_dir: PathBuf,
    /// Call fsync after writing content blobs. Disable for high-throughput
    /// scenarios on battery-backed storage (spec.md §4.1).
    pub fsync_blobs: bool,
    /// Number of stripe-lock buckets for CAS ref-count coordination. Must
    /// be a power of two.
    pub cas_stripes: usize,
    /// Recursion depth bound for ReBAC relation expansion (spec.md §4.5.2).
    pub rebac_max_depth: u32,
    /// Tiger bitmap staleness window in zone-revision units (spec.md §4.5.4,
    /// §9 — resolved as an inclusive `>=` comparison).
    pub tiger_staleness_window: u64,
    pub boundary_cache_ttl: Duration,
    pub boundary_cache_capacity: usize,
    pub leopard_cache_ttl: Duration,
    pub leopard_cache_capacity: usize,
    pub resiliency: ResiliencyConfig,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./nexus-data"),
            fsync_blobs: true,
            cas_stripes: 64,
            rebac_max_depth: 50,
            tiger_staleness_window: 0,
            boundary_cache_ttl: Duration::from_secs(300),
            boundary_cache_capacity: 50_000,
            leopard_cache_ttl: Duration::from_secs(300),
            leopard_cache_capacity: 10_000,
            resiliency: ResiliencyConfig::default(),
        }
    }
}

impl NexusConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn cas_dir(&self) -> PathBuf {
        self.data_dir.join("cas")
    }

    pub fn sled_dir(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }
}

/// Named resiliency policy, composed outer-to-inner as circuit breaker then
/// retry-with-jitter then timeout (spec.md §4.7), modelled on the named
/// policy objects of `resiliency.py`.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ResiliencyConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for ResiliencyConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(5),
        }
    }
}
