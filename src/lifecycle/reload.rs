//! Configuration and certificate reload.
//!
//! # Data Flow
//! ```text
//! Reload trigger (SIGHUP, file watcher, API call)
//!     → load + validate config           (failure: keep serving, error record)
//!     → prepare next snapshot
//!     → prepare certificate bundle set   (failure: keep serving, error record)
//!     → bind ports new to the snapshot   (failure: keep serving, error record)
//!     → install certificates → publish snapshot → start new listeners
//!     → stop listeners for removed ports
//! ```
//!
//! # Design Decisions
//! - Every fallible step happens before anything is swapped
//! - Reloads are serialized; overlapping triggers run one after another
//! - In-flight connections keep the snapshot they were accepted under

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{load_config, ConfigError, GatewayConfig, SnapshotHandle};
use crate::http::GatewayServer;
use crate::net::ListenerError;
use crate::observability::{metrics, AccessLogger, ErrorKind, ErrorRecord};
use crate::tls::{CertificateError, CertificateStore};

/// A reload that was rejected. The previous configuration keeps serving.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("no configuration file to reload from")]
    NoConfigPath,

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("certificates: {0}")]
    Certificate(#[from] CertificateError),

    #[error("listeners: {0}")]
    Listener(#[from] ListenerError),
}

impl ReloadError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReloadError::NoConfigPath | ReloadError::Config(_) => ErrorKind::Config,
            ReloadError::Certificate(_) => ErrorKind::Certificate,
            ReloadError::Listener(_) => ErrorKind::Io,
        }
    }
}

/// Applies new configuration to a running gateway. Cheap to clone.
#[derive(Clone)]
pub struct Reloader {
    snapshots: Arc<SnapshotHandle>,
    certificates: Arc<CertificateStore>,
    server: Arc<GatewayServer>,
    logger: AccessLogger,
    config_path: Option<PathBuf>,
    serialize: Arc<tokio::sync::Mutex<()>>,
}

impl Reloader {
    pub(crate) fn new(
        snapshots: Arc<SnapshotHandle>,
        certificates: Arc<CertificateStore>,
        server: Arc<GatewayServer>,
        logger: AccessLogger,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            snapshots,
            certificates,
            server,
            logger,
            config_path,
            serialize: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Re-read the configuration file (and every certificate it names).
    pub async fn reload_from_disk(&self) -> Result<u64, ReloadError> {
        let result = match &self.config_path {
            Some(path) => match load_config(path) {
                Ok(config) => self.apply_inner(config).await,
                Err(e) => Err(e.into()),
            },
            None => Err(ReloadError::NoConfigPath),
        };
        self.finish(result).await
    }

    /// Apply an already-parsed configuration.
    pub async fn apply(&self, config: GatewayConfig) -> Result<u64, ReloadError> {
        let result = self.apply_inner(config).await;
        self.finish(result).await
    }

    async fn apply_inner(&self, config: GatewayConfig) -> Result<u64, ReloadError> {
        let _serialized = self.serialize.lock().await;
        let current = self.snapshots.load();

        if config.listener.bind_host != current.config().listener.bind_host
            || config.listener.max_connections != current.config().listener.max_connections
        {
            tracing::warn!("Listener settings changed; they take effect on restart");
        }
        if config.logging.access.destination != current.config().logging.access.destination
            || config.logging.error.destination != current.config().logging.error.destination
        {
            tracing::warn!("Log destinations changed; they take effect on restart");
        }

        let next = self.snapshots.prepare(config)?;
        let bundles = self.certificates.prepare(next.router())?;
        let listeners = self.server.bind_missing(&next).await?;

        self.certificates.install(bundles);
        let version = next.version();
        self.snapshots.publish(next);

        let published = self.snapshots.load();
        self.server.refresh_upstream(&published);
        self.server.start(listeners).await;
        self.server.retire_unused(&published).await;

        Ok(version)
    }

    async fn finish(&self, result: Result<u64, ReloadError>) -> Result<u64, ReloadError> {
        match &result {
            Ok(version) => {
                metrics::record_reload("success");
                tracing::info!(version = version, "Reload complete");
            }
            Err(err) => {
                metrics::record_reload("failure");
                tracing::error!(error = %err, "Reload rejected, previous configuration still active");
                self.logger
                    .record_error(ErrorRecord::new(err.kind(), "reload", err))
                    .await;
            }
        }
        result
    }
}
