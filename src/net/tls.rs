//! SNI-first TLS termination.
//!
//! The ClientHello is read before any certificate is chosen. Its SNI is
//! routed like a `Host` header (exact name, then the port default), and the
//! handshake is completed with that host's own `ServerConfig`, so protocol
//! allow-lists, cipher suites and client-certificate requirements are
//! enforced per host.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::server::Acceptor;
use rustls::ProtocolVersion;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use crate::config::schema::TlsProtocol;
use crate::config::ConfigSnapshot;
use crate::net::connection::TlsSession;
use crate::routing::{HostKey, VirtualHost};
use crate::tls::{ciphers, CertificateError, CertificateStore};

/// Why a TLS connection never reached HTTP.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake not completed within {0:?}")]
    Timeout(Duration),

    #[error("failed to read ClientHello: {0}")]
    ClientHello(#[source] io::Error),

    #[error("no virtual host for server name {}", .sni.as_deref().unwrap_or("<none>"))]
    NoRoute { sni: Option<String> },

    #[error("no certificate for {host}: {source}")]
    Certificate {
        host: HostKey,
        #[source]
        source: CertificateError,
    },

    #[error("handshake with {host} rejected: {source}")]
    Rejected {
        host: HostKey,
        #[source]
        source: io::Error,
    },
}

impl HandshakeError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::Timeout(_) => "timeout",
            HandshakeError::ClientHello(_) => "client_hello",
            HandshakeError::NoRoute { .. } => "no_route",
            HandshakeError::Certificate { .. } => "certificate",
            HandshakeError::Rejected { source, .. } => match rustls_error(source) {
                Some(rustls::Error::PeerIncompatible(_)) => "protocol",
                Some(rustls::Error::NoCertificatesPresented)
                | Some(rustls::Error::InvalidCertificate(_)) => "client_certificate",
                _ => "rejected",
            },
        }
    }

    /// The server the client asked for: the unrouted SNI name, or the routed host.
    pub fn server_name(&self) -> Option<String> {
        match self {
            HandshakeError::NoRoute { sni } => sni.clone(),
            HandshakeError::Certificate { host, .. } | HandshakeError::Rejected { host, .. } => {
                Some(host.to_string())
            }
            _ => None,
        }
    }
}

fn rustls_error(err: &io::Error) -> Option<&rustls::Error> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
}

fn negotiated_protocol(version: Option<ProtocolVersion>) -> Option<TlsProtocol> {
    match version? {
        ProtocolVersion::TLSv1_2 => Some(TlsProtocol::Tls12),
        ProtocolVersion::TLSv1_3 => Some(TlsProtocol::Tls13),
        _ => None,
    }
}

/// Complete a TLS handshake on a connection that arrived on `port`.
pub async fn accept_tls(
    stream: TcpStream,
    port: u16,
    snapshot: &ConfigSnapshot,
    certificates: &CertificateStore,
    timeout: Duration,
) -> Result<(TlsStream<TcpStream>, TlsSession), HandshakeError> {
    tokio::time::timeout(timeout, handshake(stream, port, snapshot, certificates))
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))?
}

async fn handshake(
    stream: TcpStream,
    port: u16,
    snapshot: &ConfigSnapshot,
    certificates: &CertificateStore,
) -> Result<(TlsStream<TcpStream>, TlsSession), HandshakeError> {
    let start = LazyConfigAcceptor::new(Acceptor::default(), stream)
        .await
        .map_err(HandshakeError::ClientHello)?;

    let sni = start.client_hello().server_name().map(str::to_string);
    let host: Arc<VirtualHost> = snapshot
        .router()
        .resolve(port, sni.as_deref())
        .into_host()
        .ok_or_else(|| HandshakeError::NoRoute { sni: sni.clone() })?;

    let bundle = certificates
        .lookup(host.key())
        .map_err(|source| HandshakeError::Certificate {
            host: host.key().clone(),
            source,
        })?;

    tracing::trace!(
        sni = sni.as_deref().unwrap_or("-"),
        host = %host.key(),
        "ClientHello routed"
    );

    let tls_stream = start
        .into_stream(bundle.server_config())
        .await
        .map_err(|source| HandshakeError::Rejected {
            host: host.key().clone(),
            source,
        })?;

    let (_, connection) = tls_stream.get_ref();
    let session = TlsSession {
        host,
        sni,
        protocol: negotiated_protocol(connection.protocol_version()),
        cipher_suite: connection.negotiated_cipher_suite().and_then(ciphers::rfc_name),
        client_cert_presented: connection
            .peer_certificates()
            .is_some_and(|certs| !certs.is_empty()),
    };

    tracing::debug!(
        host = %session.host.key(),
        protocol = session.protocol.map(|p| p.as_str()).unwrap_or("-"),
        cipher_suite = session.cipher_suite.unwrap_or("-"),
        client_cert = session.client_cert_presented,
        "TLS handshake complete"
    );

    Ok((tls_stream, session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_negotiated_versions() {
        assert_eq!(negotiated_protocol(Some(ProtocolVersion::TLSv1_3)), Some(TlsProtocol::Tls13));
        assert_eq!(negotiated_protocol(Some(ProtocolVersion::TLSv1_2)), Some(TlsProtocol::Tls12));
        assert_eq!(negotiated_protocol(Some(ProtocolVersion::TLSv1_0)), None);
        assert_eq!(negotiated_protocol(None), None);
    }

    #[test]
    fn classifies_rejections() {
        let protocol = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::PeerIncompatible(rustls::PeerIncompatible::NoCipherSuitesInCommon),
        );
        let rejected = |source| HandshakeError::Rejected {
            host: HostKey::new(443, Some("shop.example.com")),
            source,
        };
        assert_eq!(rejected(protocol).reason(), "protocol");

        let no_cert = io::Error::new(io::ErrorKind::InvalidData, rustls::Error::NoCertificatesPresented);
        let err = rejected(no_cert);
        assert_eq!(err.reason(), "client_certificate");
        assert_eq!(err.server_name().as_deref(), Some("shop.example.com:443"));

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(rejected(reset).reason(), "rejected");

        let default_host = HandshakeError::Rejected {
            host: HostKey::new(443, None),
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert_eq!(default_host.server_name().as_deref(), Some("_default_:443"));
        assert!(HandshakeError::Timeout(Duration::from_secs(1)).server_name().is_none());

        let no_route = HandshakeError::NoRoute {
            sni: Some("unknown.example.com".into()),
        };
        assert_eq!(no_route.reason(), "no_route");
        assert_eq!(no_route.server_name().as_deref(), Some("unknown.example.com"));
        assert!(no_route.to_string().contains("unknown.example.com"));
    }
}
