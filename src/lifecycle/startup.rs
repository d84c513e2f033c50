//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and compile the first snapshot
//! - Load every certificate before any socket is bound
//! - Open the access and error streams
//! - Bind listeners and begin accepting traffic
//! - Run the control loop (reload, shutdown) and drain on exit
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{load_config, ConfigSnapshot, GatewayConfig, SnapshotHandle};
use crate::error::GatewayError;
use crate::http::GatewayServer;
use crate::lifecycle::reload::Reloader;
use crate::lifecycle::signals::ControlEvent;
use crate::observability::AccessLogger;
use crate::tls::CertificateStore;

/// A running gateway.
pub struct Gateway {
    snapshots: Arc<SnapshotHandle>,
    certificates: Arc<CertificateStore>,
    logger: AccessLogger,
    server: Arc<GatewayServer>,
    reloader: Reloader,
}

impl Gateway {
    /// Start serving `config`.
    ///
    /// `config_path` is re-read on reload; without it only `Reloader::apply` works.
    pub async fn start(config: GatewayConfig, config_path: Option<PathBuf>) -> Result<Self, GatewayError> {
        let logging = config.logging.clone();

        let snapshots = Arc::new(SnapshotHandle::new(config)?);
        let snapshot = snapshots.load();
        tracing::info!(
            version = snapshot.version(),
            virtual_hosts = snapshot.router().hosts().len(),
            "Configuration loaded"
        );

        let certificates = Arc::new(CertificateStore::load(snapshot.router())?);
        let logger = AccessLogger::open(&logging).await?;

        let server = Arc::new(GatewayServer::new(
            Arc::clone(&snapshots),
            Arc::clone(&certificates),
            logger.clone(),
        ));
        if let Err(e) = server.sync_listeners().await {
            logger.close().await;
            return Err(e.into());
        }

        let reloader = Reloader::new(
            Arc::clone(&snapshots),
            Arc::clone(&certificates),
            Arc::clone(&server),
            logger.clone(),
            config_path,
        );

        tracing::info!(ports = ?server.ports().await, "Gateway started");

        Ok(Self {
            snapshots,
            certificates,
            logger,
            server,
            reloader,
        })
    }

    /// Address a configured port is bound to.
    pub async fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.server.local_addr(port).await
    }

    /// Ports currently accepting connections.
    pub async fn ports(&self) -> Vec<u16> {
        self.server.ports().await
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshots.load()
    }

    /// Connect timeout currently applied to upstream forwards.
    pub fn upstream_connect_timeout(&self) -> Duration {
        self.server.upstream_connect_timeout()
    }

    pub fn certificates(&self) -> &CertificateStore {
        &self.certificates
    }

    pub fn logger(&self) -> &AccessLogger {
        &self.logger
    }

    pub fn reloader(&self) -> Reloader {
        self.reloader.clone()
    }

    /// Process control events until shutdown is requested or every sender is gone.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ControlEvent::Reload => {
                    // Failures are logged by the reloader; keep serving.
                    let _ = self.reloader.reload_from_disk().await;
                }
                ControlEvent::Shutdown => break,
            }
        }
    }

    /// Stop accepting, drain connections, flush logs.
    ///
    /// Returns `true` when every connection finished within the grace period.
    pub async fn shutdown(self) -> bool {
        let grace = Duration::from_secs(self.snapshots.load().config().timeouts.shutdown_grace_secs);
        tracing::info!(
            grace_secs = grace.as_secs(),
            active_connections = self.server.active_connections(),
            "Shutting down"
        );

        let drained = self.server.shutdown(grace).await;
        self.logger.close().await;

        tracing::info!(drained = drained, "Shutdown complete");
        drained
    }
}

/// Summary of a successful configuration check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub virtual_hosts: usize,
    pub ports: Vec<u16>,
    pub certificates: usize,
}

/// Validate a configuration file and load every certificate it names,
/// without binding anything.
pub fn check_config(path: &Path) -> Result<CheckReport, GatewayError> {
    let config = load_config(path)?;
    let snapshot = ConfigSnapshot::build(config, 0)?;
    let certificates = CertificateStore::load(snapshot.router())?;

    Ok(CheckReport {
        virtual_hosts: snapshot.router().hosts().len(),
        ports: snapshot.router().ports().map(|(port, _)| port).collect(),
        certificates: certificates.len(),
    })
}
