//! Certificate store with atomic hot reload.
//!
//! # Responsibilities
//! - Load the certificate chain and private key of every TLS virtual host
//! - Compile each host's handshake policy into a `ServerConfig`
//! - Replace the whole set atomically on reload
//!
//! # Design Decisions
//! - A new `BundleSet` is built completely before it is installed; any
//!   failure leaves the previous set serving
//! - Private keys never leave the bundle; callers only see the compiled
//!   `ServerConfig`
//! - Readers go through `ArcSwap` and never lock

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use crate::routing::{HostKey, VirtualHost, VirtualHostRouter};
use crate::tls::{loader, policy, CertificateError};

/// Certificate material and compiled policy for one TLS host.
#[derive(Debug)]
pub struct CertificateBundle {
    key: HostKey,
    certified_key: Arc<CertifiedKey>,
    server_config: Arc<ServerConfig>,
    loaded_at: DateTime<Utc>,
}

impl CertificateBundle {
    /// Load the host's key pair and compile its `ServerConfig`.
    pub fn load(host: &VirtualHost) -> Result<Self, CertificateError> {
        let config = host.config();
        let (cert_file, key_file) = match (&config.cert_file, &config.key_file) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(CertificateError::MissingPaths {
                    host: host.key().to_string(),
                })
            }
        };

        let provider = Arc::new(policy::crypto_provider(&config.cipher_suites)?);
        let certified_key = Arc::new(loader::load_certified_key(cert_file, key_file, &provider)?);
        let server_config = policy::build_server_config(host, provider, Arc::clone(&certified_key))?;

        tracing::debug!(
            host = %host.key(),
            cert_file = %cert_file.display(),
            chain_len = certified_key.cert.len(),
            protocols = ?config.tls_protocols,
            client_auth = host.requires_client_cert(),
            "Certificate bundle loaded"
        );

        Ok(Self {
            key: host.key().clone(),
            certified_key,
            server_config: Arc::new(server_config),
            loaded_at: Utc::now(),
        })
    }

    pub fn key(&self) -> &HostKey {
        &self.key
    }

    pub fn server_name(&self) -> Option<&str> {
        self.key.server_name.as_deref()
    }

    /// Number of certificates in the presented chain.
    pub fn chain_len(&self) -> usize {
        self.certified_key.cert.len()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Handshake configuration for this host.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }
}

/// A complete generation of bundles, one per TLS host.
#[derive(Debug, Default)]
pub struct BundleSet {
    bundles: HashMap<HostKey, Arc<CertificateBundle>>,
}

impl BundleSet {
    /// Load every TLS host of `router`, failing on the first broken host.
    pub fn prepare(router: &VirtualHostRouter) -> Result<Self, CertificateError> {
        let mut bundles = HashMap::new();
        for host in router.tls_hosts() {
            let bundle = CertificateBundle::load(host)?;
            bundles.insert(host.key().clone(), Arc::new(bundle));
        }
        Ok(Self { bundles })
    }

    pub fn get(&self, key: &HostKey) -> Option<&Arc<CertificateBundle>> {
        self.bundles.get(key)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Shared, hot-swappable certificate store.
#[derive(Debug)]
pub struct CertificateStore {
    current: ArcSwap<BundleSet>,
}

impl CertificateStore {
    /// Load certificates for every TLS host at startup.
    pub fn load(router: &VirtualHostRouter) -> Result<Self, CertificateError> {
        let set = BundleSet::prepare(router)?;
        tracing::info!(bundles = set.len(), "Certificate store loaded");
        Ok(Self {
            current: ArcSwap::from_pointee(set),
        })
    }

    /// Build a replacement set without installing it.
    pub fn prepare(&self, router: &VirtualHostRouter) -> Result<BundleSet, CertificateError> {
        BundleSet::prepare(router)
    }

    /// Atomically replace the current set.
    pub fn install(&self, set: BundleSet) {
        let count = set.len();
        self.current.store(Arc::new(set));
        tracing::info!(bundles = count, "Certificate store swapped");
    }

    /// Prepare and install in one step. On error the prior set stays in place.
    pub fn reload(&self, router: &VirtualHostRouter) -> Result<usize, CertificateError> {
        let set = self.prepare(router)?;
        let count = set.len();
        self.install(set);
        Ok(count)
    }

    /// Bundle for the routed host.
    pub fn lookup(&self, key: &HostKey) -> Result<Arc<CertificateBundle>, CertificateError> {
        self.current
            .load()
            .get(key)
            .cloned()
            .ok_or_else(|| CertificateError::NotFound(key.clone()))
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }
}
