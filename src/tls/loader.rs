//! PEM loading for certificate chains, private keys and client CA bundles.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;

use crate::tls::CertificateError;

fn open(path: &Path) -> Result<BufReader<File>, CertificateError> {
    let file = File::open(path).map_err(|source| CertificateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Load every certificate in a PEM file, leaf first.
pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertificateError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(CertificateError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertificateError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| CertificateError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| CertificateError::NoPrivateKey {
            path: path.to_path_buf(),
        })
}

/// Load a chain and key and check that the key belongs to the leaf certificate.
pub fn load_certified_key(
    cert_path: &Path,
    key_path: &Path,
    provider: &CryptoProvider,
) -> Result<CertifiedKey, CertificateError> {
    let chain = load_cert_chain(cert_path)?;
    let key = load_private_key(key_path)?;

    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|e| CertificateError::InvalidKey {
            path: key_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let certified = CertifiedKey::new(chain, signing_key);
    match certified.keys_match() {
        Ok(()) => Ok(certified),
        Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {
            tracing::warn!(
                cert_file = %cert_path.display(),
                "Cannot verify that the private key matches the certificate"
            );
            Ok(certified)
        }
        Err(e) => Err(CertificateError::KeyMismatch {
            path: cert_path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Load CA certificates used to verify client certificates (mTLS).
pub fn load_client_roots(path: &Path) -> Result<RootCertStore, CertificateError> {
    let certs = load_cert_chain(path)?;

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots.add(cert).map_err(|e| CertificateError::InvalidCa {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }

    tracing::debug!(
        ca_file = %path.display(),
        cert_count = roots.len(),
        "Loaded client CA certificates"
    );
    Ok(roots)
}

#[cfg(test)]
pub(crate) mod test_pki {
    //! Throwaway certificates for unit tests.

    use std::path::{Path, PathBuf};

    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    pub struct Pair {
        pub cert: PathBuf,
        pub key: PathBuf,
    }

    pub fn self_signed(dir: &Path, name: &str) -> Pair {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![name.to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        write_pair(dir, name, &cert.pem(), &key.serialize_pem())
    }

    pub fn ca(dir: &Path, name: &str) -> Pair {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        write_pair(dir, name, &cert.pem(), &key.serialize_pem())
    }

    pub fn write_pair(dir: &Path, name: &str, cert_pem: &str, key_pem: &str) -> Pair {
        let cert = dir.join(format!("{}.crt", name));
        let key = dir.join(format!("{}.key", name));
        std::fs::write(&cert, cert_pem).unwrap();
        std::fs::write(&key, key_pem).unwrap();
        Pair { cert, key }
    }
}

#[cfg(test)]
mod tests {
    use super::test_pki;
    use super::*;

    fn provider() -> CryptoProvider {
        rustls::crypto::ring::default_provider()
    }

    #[test]
    fn loads_matching_pair() {
        let dir = tempfile::tempdir().unwrap();
        let pair = test_pki::self_signed(dir.path(), "www.example.com");
        let certified = load_certified_key(&pair.cert, &pair.key, &provider()).unwrap();
        assert_eq!(certified.cert.len(), 1);
    }

    #[test]
    fn rejects_key_from_another_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let a = test_pki::self_signed(dir.path(), "a.example.com");
        let b = test_pki::self_signed(dir.path(), "b.example.com");
        let err = load_certified_key(&a.cert, &b.key, &provider()).unwrap_err();
        assert!(matches!(err, CertificateError::KeyMismatch { .. }), "{}", err);
    }

    #[test]
    fn missing_and_empty_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.crt");
        assert!(matches!(
            load_cert_chain(&missing),
            Err(CertificateError::Read { .. })
        ));

        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "not a pem file\n").unwrap();
        assert!(matches!(
            load_cert_chain(&empty),
            Err(CertificateError::NoCertificates { .. })
        ));
        assert!(matches!(
            load_private_key(&empty),
            Err(CertificateError::NoPrivateKey { .. })
        ));
    }

    #[test]
    fn loads_client_roots() {
        let dir = tempfile::tempdir().unwrap();
        let ca = test_pki::ca(dir.path(), "clients-ca");
        let roots = load_client_roots(&ca.cert).unwrap();
        assert_eq!(roots.len(), 1);
    }
}
