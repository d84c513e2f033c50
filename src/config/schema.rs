//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from TOML files.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings shared by every bound port.
    pub listener: ListenerConfig,

    /// Virtual host definitions (`[[virtual_host]]` tables).
    #[serde(rename = "virtual_host")]
    pub virtual_hosts: Vec<VirtualHostConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Diagnostic tracing and access/error log streams.
    pub logging: LoggingConfig,

    /// Metrics exposition.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface every virtual-host port is bound on (e.g., "0.0.0.0").
    pub bind_host: String,

    /// Maximum concurrent connections across all ports (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            max_connections: 10_000,
        }
    }
}

/// A single virtual host bound to a port.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VirtualHostConfig {
    /// Port this host answers on.
    pub port: u16,

    /// Primary host name. `None` makes this the port's default host.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Additional names resolving to this host.
    #[serde(default)]
    pub server_aliases: Vec<String>,

    /// Directory static content is served from.
    #[serde(default)]
    pub document_root: Option<PathBuf>,

    /// Upstream origin (`http://host:port[/prefix]`) requests are forwarded to.
    #[serde(default)]
    pub upstream: Option<String>,

    /// Files tried, in order, when a directory is requested.
    #[serde(default = "default_index_files")]
    pub index_files: Vec<String>,

    /// Terminate TLS for this host.
    #[serde(default)]
    pub tls_enabled: bool,

    /// Explicit protocol allow-list. Nothing is enabled unless listed.
    #[serde(default)]
    pub tls_protocols: Vec<TlsProtocol>,

    /// Cipher suites (RFC or OpenSSL names). Empty keeps provider defaults.
    #[serde(default)]
    pub cipher_suites: Vec<String>,

    /// Certificate chain (PEM).
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Private key (PEM).
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// CA bundle client certificates are verified against (PEM).
    #[serde(default)]
    pub client_ca_file: Option<PathBuf>,

    /// Demand and verify a client certificate during the handshake.
    #[serde(default)]
    pub require_client_cert: bool,
}

fn default_index_files() -> Vec<String> {
    vec!["index.html".to_string()]
}

impl VirtualHostConfig {
    /// A plaintext host serving `document_root`.
    pub fn new(port: u16, server_name: Option<&str>, document_root: impl Into<PathBuf>) -> Self {
        Self {
            port,
            server_name: server_name.map(str::to_string),
            server_aliases: Vec::new(),
            document_root: Some(document_root.into()),
            upstream: None,
            index_files: default_index_files(),
            tls_enabled: false,
            tls_protocols: Vec::new(),
            cipher_suites: Vec::new(),
            cert_file: None,
            key_file: None,
            client_ca_file: None,
            require_client_cert: false,
        }
    }

    /// Enable TLS with the given key pair and protocol allow-list.
    pub fn with_tls(
        mut self,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
        protocols: &[TlsProtocol],
    ) -> Self {
        self.tls_enabled = true;
        self.cert_file = Some(cert_file.into());
        self.key_file = Some(key_file.into());
        self.tls_protocols = protocols.to_vec();
        self
    }

    /// Require client certificates issued by the CA in `ca_file`.
    pub fn with_client_auth(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.require_client_cert = true;
        self.client_ca_file = Some(ca_file.into());
        self
    }

    /// Human-readable identifier used in logs: `name:port` or `_default_:port`.
    pub fn label(&self) -> String {
        match &self.server_name {
            Some(name) => format!("{}:{}", name, self.port),
            None => format!("_default_:{}", self.port),
        }
    }
}

/// TLS protocol versions as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum TlsProtocol {
    #[serde(rename = "SSLv3")]
    Ssl3,
    #[serde(rename = "TLSv1")]
    Tls10,
    #[serde(rename = "TLSv1.1")]
    Tls11,
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl TlsProtocol {
    /// Whether this build can negotiate the version at all.
    pub fn is_supported(&self) -> bool {
        matches!(self, TlsProtocol::Tls12 | TlsProtocol::Tls13)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TlsProtocol::Ssl3 => "SSLv3",
            TlsProtocol::Tls10 => "TLSv1",
            TlsProtocol::Tls11 => "TLSv1.1",
            TlsProtocol::Tls12 => "TLSv1.2",
            TlsProtocol::Tls13 => "TLSv1.3",
        }
    }
}

impl fmt::Display for TlsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SSLv3" => Ok(TlsProtocol::Ssl3),
            "TLSv1" | "TLSv1.0" => Ok(TlsProtocol::Tls10),
            "TLSv1.1" => Ok(TlsProtocol::Tls11),
            "TLSv1.2" => Ok(TlsProtocol::Tls12),
            "TLSv1.3" => Ok(TlsProtocol::Tls13),
            other => Err(format!("unknown TLS protocol '{}'", other)),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed for a client to complete the TLS handshake, in seconds.
    pub handshake_secs: u64,

    /// Request timeout (total time for request/response) in seconds. Also bounds
    /// header reads and how long a new connection may stay silent.
    pub request_secs: u64,

    /// Upstream connection establishment timeout in seconds.
    pub upstream_connect_secs: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: 10,
            request_secs: 30,
            upstream_connect_secs: 5,
            shutdown_grace_secs: 10,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Diagnostic log level (trace, debug, info, warn, error).
    pub level: String,

    /// Diagnostic log format.
    pub format: RecordFormat,

    /// Access record stream.
    pub access: LogStreamConfig,

    /// Error record stream.
    pub error: LogStreamConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: RecordFormat::Text,
            access: LogStreamConfig::default(),
            error: LogStreamConfig {
                destination: "stderr".to_string(),
                ..LogStreamConfig::default()
            },
        }
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    Text,
    Json,
}

/// What a log stream does when its buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered record; producers never wait.
    DropOldest,
    /// Producers wait for space up to `backpressure_timeout_ms`, then the new record is dropped.
    Backpressure,
}

/// A single append-only log stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogStreamConfig {
    /// "stdout", "stderr", or a file path opened for append.
    pub destination: String,

    /// Line format.
    pub format: RecordFormat,

    /// Maximum buffered records awaiting the writer.
    pub capacity: usize,

    /// Overflow behaviour once `capacity` is reached.
    pub overflow: OverflowPolicy,

    /// Upper bound on producer waiting under `backpressure`.
    pub backpressure_timeout_ms: u64,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            destination: "stdout".to_string(),
            format: RecordFormat::Text,
            capacity: 4096,
            overflow: OverflowPolicy::DropOldest,
            backpressure_timeout_ms: 50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names_round_trip_through_from_str() {
        for protocol in [
            TlsProtocol::Ssl3,
            TlsProtocol::Tls10,
            TlsProtocol::Tls11,
            TlsProtocol::Tls12,
            TlsProtocol::Tls13,
        ] {
            assert_eq!(protocol.as_str().parse::<TlsProtocol>(), Ok(protocol));
        }
        assert!("TLSv9".parse::<TlsProtocol>().is_err());
    }

    #[test]
    fn only_modern_protocols_are_supported() {
        assert!(TlsProtocol::Tls12.is_supported());
        assert!(TlsProtocol::Tls13.is_supported());
        assert!(!TlsProtocol::Tls11.is_supported());
        assert!(!TlsProtocol::Ssl3.is_supported());
    }

    #[test]
    fn label_marks_default_hosts() {
        let named = VirtualHostConfig::new(443, Some("www.example.com"), "/srv/www");
        let default = VirtualHostConfig::new(80, None, "/srv/default");
        assert_eq!(named.label(), "www.example.com:443");
        assert_eq!(default.label(), "_default_:80");
    }
}
