//! TLS subsystem: certificates and per-host handshake policy.
//!
//! # Data Flow
//! ```text
//! VirtualHostRouter (TLS hosts of a snapshot)
//!     → loader.rs (PEM chain + key → CertifiedKey, key/cert match check)
//!     → policy.rs (protocol allow-list, cipher suites, client verifier → ServerConfig)
//!     → store.rs (BundleSet keyed by HostKey, published via ArcSwap)
//!     → net::tls picks the host's ServerConfig after reading the ClientHello
//! ```
//!
//! # Design Decisions
//! - Every protocol version is disabled unless explicitly listed
//! - A bundle set is installed only when every TLS host loaded successfully
//! - Crypto provider is chosen explicitly (ring), never process-global state

pub mod ciphers;
pub mod loader;
pub mod policy;
pub mod store;

use std::path::PathBuf;

use thiserror::Error;

use crate::routing::HostKey;

pub use store::{BundleSet, CertificateBundle, CertificateStore};

/// Certificate and TLS policy failures.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("{host}: tls_enabled without cert_file and key_file")]
    MissingPaths { host: String },

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: no certificates found", .path.display())]
    NoCertificates { path: PathBuf },

    #[error("{}: no private key found", .path.display())]
    NoPrivateKey { path: PathBuf },

    #[error("{}: unusable private key: {reason}", .path.display())]
    InvalidKey { path: PathBuf, reason: String },

    #[error("{}: private key does not match certificate: {reason}", .path.display())]
    KeyMismatch { path: PathBuf, reason: String },

    #[error("{}: invalid CA bundle: {reason}", .path.display())]
    InvalidCa { path: PathBuf, reason: String },

    #[error("unknown cipher suite '{0}'")]
    UnknownCipherSuite(String),

    #[error("{host}: {reason}")]
    Policy { host: String, reason: String },

    #[error("no certificate loaded for {0}")]
    NotFound(HostKey),
}
