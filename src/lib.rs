//! Multi-tenant, agent-oriented virtual filesystem core.
//!
//! Composes content-addressable blob storage ([`cas`]), a transactional
//! path→metadata store ([`metadata`]), zone/mount resolution ([`zone`]),
//! workspace overlays ([`overlay`]) and a `nexus-rebac`-enforced kernel
//! ([`kernel`]) behind a single [`NexusCore`] entry point.

pub mod cas;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod hash;
pub mod kernel;
pub mod metadata;
pub mod overlay;
pub mod path;
pub mod resiliency;
pub mod zone;

use std::sync::Arc;

use nexus_rebac::{RebacConfig, RebacEngine, ZoneId};

pub use config::{NexusConfig, ResiliencyConfig};
pub use context::OperationContext;
pub use error::{NexusError, Result};
pub use kernel::{Kernel, KernelConfig, PermissionEnforcer};
pub use path::NormalizedPath;

use cas::CasStore;
use events::{EventSink, InMemoryEventSink, ReadSetTracker};
use resiliency::ResiliencyRegistry;
use zone::ZoneManager;

/// Initialises a global `tracing` subscriber from `RUST_LOG` (info by
/// default), matching the filter/writer shape of `tlfs`'s `Migrate::new`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let env = std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Top-level handle on an embedded instance: owns the sled database, the
/// CAS root, the zone manager and the ReBAC engine, and hands out a
/// [`Kernel`] wired to all of them. One process embeds one `NexusCore`.
pub struct NexusCore {
    zones: Arc<ZoneManager>,
    cas: Arc<CasStore>,
    rebac: Arc<RebacEngine>,
    kernel: Kernel,
    /// Holds the temporary data directory alive for `memory()` instances;
    /// `None` for `open()`-backed instances, which own their directory.
    _tempdir: Option<tempfile::TempDir>,
}

impl NexusCore {
    /// Opens (or creates) the sled database and CAS root under
    /// `config.data_dir`, registering `root_zone` as the top-level zone.
    pub fn open(config: &NexusConfig, root_zone: ZoneId) -> Result<Self> {
        let db = sled::open(config.sled_dir())?;
        let resiliency = ResiliencyRegistry::new(config.resiliency);
        let zones = Arc::new(ZoneManager::new_with_resiliency(db, root_zone, resiliency.policy("metadata-store"))?);
        let cas = Arc::new(CasStore::new_with_resiliency(
            config.cas_dir(),
            config.fsync_blobs,
            config.cas_stripes,
            resiliency.policy("cas-blob-store"),
        )?);

        let rebac_config = RebacConfig {
            leopard_cache_capacity: config.leopard_cache_capacity,
            leopard_cache_ttl: config.leopard_cache_ttl,
            boundary_cache_capacity: config.boundary_cache_capacity,
            boundary_cache_ttl: config.boundary_cache_ttl,
            tiger_staleness_window: config.tiger_staleness_window,
            max_check_depth: config.rebac_max_depth,
        };
        let rebac = Arc::new(RebacEngine::new(rebac_config));

        let kernel = Kernel::new(
            zones.clone(),
            cas.clone(),
            rebac.clone(),
            Arc::new(InMemoryEventSink::new()) as Arc<dyn EventSink>,
            None,
            KernelConfig::default(),
        );

        Ok(Self { zones, cas, rebac, kernel, _tempdir: None })
    }

    /// An in-memory instance for tests and short-lived tools: the backing
    /// directory is removed when the returned `NexusCore` is dropped.
    pub fn memory(root_zone: ZoneId) -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(NexusError::from)?;
        let config = NexusConfig {
            data_dir: tmp.path().to_path_buf(),
            ..NexusConfig::default()
        };
        let mut core = Self::open(&config, root_zone)?;
        core._tempdir = Some(tmp);
        Ok(core)
    }

    /// Rebuilds the kernel with a custom event sink and/or read-set
    /// tracker — used by embedders that want to observe committed
    /// mutations or feed a cache-invalidation layer.
    pub fn with_observers(
        mut self,
        events: Arc<dyn EventSink>,
        read_set: Option<Arc<dyn ReadSetTracker>>,
        kernel_config: KernelConfig,
    ) -> Self {
        self.kernel = Kernel::new(self.zones.clone(), self.cas.clone(), self.rebac.clone(), events, read_set, kernel_config);
        self
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn zones(&self) -> &Arc<ZoneManager> {
        &self.zones
    }

    pub fn rebac(&self) -> &Arc<RebacEngine> {
        &self.rebac
    }
}
