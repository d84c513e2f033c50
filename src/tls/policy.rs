//! Per-host handshake policy.
//!
//! Turns a virtual host's TLS settings into a rustls `ServerConfig`:
//! protocol versions come only from the host's allow-list, cipher suites are
//! optionally narrowed, and a WebPKI client verifier is installed when the
//! host requires client certificates.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{ServerConfig, SupportedProtocolVersion};

use crate::config::schema::TlsProtocol;
use crate::routing::VirtualHost;
use crate::tls::{ciphers, loader, CertificateError};

/// ALPN identifiers offered to clients, in preference order.
pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Map the allow-list onto rustls versions. Versions rustls cannot speak
/// are skipped; validation rejects them before we get here.
pub fn protocol_versions(protocols: &[TlsProtocol]) -> Vec<&'static SupportedProtocolVersion> {
    let mut versions = Vec::with_capacity(2);
    if protocols.contains(&TlsProtocol::Tls13) {
        versions.push(&rustls::version::TLS13);
    }
    if protocols.contains(&TlsProtocol::Tls12) {
        versions.push(&rustls::version::TLS12);
    }
    versions
}

/// The ring provider, restricted to `cipher_suites` when any are listed.
pub fn crypto_provider(cipher_suites: &[String]) -> Result<CryptoProvider, CertificateError> {
    let mut provider = rustls::crypto::ring::default_provider();
    if !cipher_suites.is_empty() {
        provider.cipher_suites = ciphers::resolve(cipher_suites)?;
    }
    Ok(provider)
}

/// Always presents the host's own certificate. Host selection already
/// happened on the SNI before this config was chosen.
#[derive(Debug)]
struct FixedCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Build the handshake configuration for one TLS virtual host.
pub fn build_server_config(
    host: &VirtualHost,
    provider: Arc<CryptoProvider>,
    certified_key: Arc<CertifiedKey>,
) -> Result<ServerConfig, CertificateError> {
    let label = host.key().to_string();
    let policy_error = |reason: String| CertificateError::Policy {
        host: label.clone(),
        reason,
    };

    let versions = protocol_versions(&host.config().tls_protocols);
    if versions.is_empty() {
        return Err(policy_error("no usable TLS protocol versions".to_string()));
    }

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&versions)
        .map_err(|e| policy_error(e.to_string()))?;

    let builder = if host.requires_client_cert() {
        let ca_file = host
            .config()
            .client_ca_file
            .as_deref()
            .ok_or_else(|| policy_error("require_client_cert without client_ca_file".to_string()))?;
        let roots = loader::load_client_roots(ca_file)?;
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| CertificateError::InvalidCa {
                path: ca_file.to_path_buf(),
                reason: e.to_string(),
            })?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let mut config = builder.with_cert_resolver(Arc::new(FixedCertResolver(certified_key)));
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}
