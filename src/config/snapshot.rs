//! Versioned, immutable configuration snapshots.
//!
//! A snapshot pairs a validated `GatewayConfig` with its compiled routing
//! table. Connections capture the current snapshot once and keep it for their
//! whole lifetime; reloads publish a new snapshot with a single pointer swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;

use crate::config::loader::ConfigError;
use crate::config::schema::GatewayConfig;
use crate::routing::router::VirtualHostRouter;

/// One published generation of configuration.
#[derive(Debug)]
pub struct ConfigSnapshot {
    version: u64,
    config: GatewayConfig,
    router: VirtualHostRouter,
    created_at: Instant,
}

impl ConfigSnapshot {
    /// Validate and compile `config` as generation `version`.
    pub fn build(config: GatewayConfig, version: u64) -> Result<Self, ConfigError> {
        let router = VirtualHostRouter::from_config(&config)?;
        Ok(Self {
            version,
            config,
            router,
            created_at: Instant::now(),
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn router(&self) -> &VirtualHostRouter {
        &self.router
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

/// Shared pointer to the current snapshot.
#[derive(Debug)]
pub struct SnapshotHandle {
    current: ArcSwap<ConfigSnapshot>,
    next_version: AtomicU64,
}

impl SnapshotHandle {
    /// Build generation 1 from the startup configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let snapshot = ConfigSnapshot::build(config, 1)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            next_version: AtomicU64::new(2),
        })
    }

    /// The snapshot new connections should use.
    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Build the next generation without publishing it.
    pub fn prepare(&self, config: GatewayConfig) -> Result<ConfigSnapshot, ConfigError> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        ConfigSnapshot::build(config, version)
    }

    /// Publish a prepared snapshot, returning the one it replaced.
    pub fn publish(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let version = snapshot.version;
        let previous = self.current.swap(Arc::new(snapshot));
        tracing::info!(
            version = version,
            previous_version = previous.version,
            "Configuration snapshot published"
        );
        previous
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }
}
