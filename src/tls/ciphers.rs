//! Cipher suite names.
//!
//! Suites may be configured by their IANA/RFC name
//! (`TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`) or by the OpenSSL name
//! administrators usually copy from existing server configs
//! (`ECDHE-RSA-AES128-GCM-SHA256`). Only suites the ring provider implements
//! are listed; anything else is rejected at load.

use rustls::crypto::ring::cipher_suite as ring_suites;
use rustls::SupportedCipherSuite;

use crate::config::schema::TlsProtocol;
use crate::tls::CertificateError;

struct SuiteName {
    rfc: &'static str,
    openssl: &'static str,
    suite: SupportedCipherSuite,
}

fn known_suites() -> [SuiteName; 9] {
    [
        // TLS 1.3 (OpenSSL uses the RFC names)
        SuiteName {
            rfc: "TLS_AES_256_GCM_SHA384",
            openssl: "TLS_AES_256_GCM_SHA384",
            suite: ring_suites::TLS13_AES_256_GCM_SHA384,
        },
        SuiteName {
            rfc: "TLS_AES_128_GCM_SHA256",
            openssl: "TLS_AES_128_GCM_SHA256",
            suite: ring_suites::TLS13_AES_128_GCM_SHA256,
        },
        SuiteName {
            rfc: "TLS_CHACHA20_POLY1305_SHA256",
            openssl: "TLS_CHACHA20_POLY1305_SHA256",
            suite: ring_suites::TLS13_CHACHA20_POLY1305_SHA256,
        },
        // TLS 1.2
        SuiteName {
            rfc: "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
            openssl: "ECDHE-ECDSA-AES256-GCM-SHA384",
            suite: ring_suites::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        },
        SuiteName {
            rfc: "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
            openssl: "ECDHE-ECDSA-AES128-GCM-SHA256",
            suite: ring_suites::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        },
        SuiteName {
            rfc: "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
            openssl: "ECDHE-ECDSA-CHACHA20-POLY1305",
            suite: ring_suites::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        },
        SuiteName {
            rfc: "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
            openssl: "ECDHE-RSA-AES256-GCM-SHA384",
            suite: ring_suites::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        },
        SuiteName {
            rfc: "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            openssl: "ECDHE-RSA-AES128-GCM-SHA256",
            suite: ring_suites::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        },
        SuiteName {
            rfc: "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
            openssl: "ECDHE-RSA-CHACHA20-POLY1305",
            suite: ring_suites::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        },
    ]
}

/// Find a suite by RFC or OpenSSL name (case-insensitive).
pub fn lookup(name: &str) -> Option<SupportedCipherSuite> {
    let wanted = name.trim().to_ascii_uppercase();
    known_suites()
        .into_iter()
        .find(|known| known.rfc == wanted || known.openssl == wanted)
        .map(|known| known.suite)
}

/// Resolve a configured list, preserving order and dropping duplicates.
pub fn resolve(names: &[String]) -> Result<Vec<SupportedCipherSuite>, CertificateError> {
    let mut suites: Vec<SupportedCipherSuite> = Vec::with_capacity(names.len());
    for name in names {
        let suite = lookup(name).ok_or_else(|| CertificateError::UnknownCipherSuite(name.clone()))?;
        if !suites.iter().any(|existing| existing.suite() == suite.suite()) {
            suites.push(suite);
        }
    }
    Ok(suites)
}

/// RFC name of a negotiated suite, for logs.
pub fn rfc_name(suite: SupportedCipherSuite) -> Option<&'static str> {
    known_suites()
        .into_iter()
        .find(|known| known.suite.suite() == suite.suite())
        .map(|known| known.rfc)
}

/// The protocol version a suite belongs to.
pub fn protocol_of(suite: SupportedCipherSuite) -> TlsProtocol {
    match suite {
        SupportedCipherSuite::Tls12(_) => TlsProtocol::Tls12,
        SupportedCipherSuite::Tls13(_) => TlsProtocol::Tls13,
    }
}
