//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Enforce per-host invariants (TLS needs a key pair, client auth needs a CA)
//! - Detect ambiguous routing (duplicate names, two defaults on one port)
//! - Validate value ranges (ports, capacities, connection limits)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::config::schema::{GatewayConfig, LogStreamConfig, VirtualHostConfig};
use crate::routing::matcher::normalize_host;
use crate::tls::ciphers;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no virtual hosts configured")]
    NoVirtualHosts,

    #[error("{host}: port 0 is not a valid listening port")]
    InvalidPort { host: String },

    #[error("{host}: invalid server name '{name}'")]
    InvalidServerName { host: String, name: String },

    #[error("port {port}: name '{name}' is claimed by more than one virtual host")]
    DuplicateServerName { port: u16, name: String },

    #[error("port {port}: more than one default virtual host (no server_name)")]
    DuplicateDefault { port: u16 },

    #[error("port {port}: TLS and plaintext virtual hosts cannot share a port")]
    MixedTlsPort { port: u16 },

    #[error("{host}: one of document_root or upstream is required")]
    MissingContentSource { host: String },

    #[error("{host}: document_root and upstream are mutually exclusive")]
    ConflictingContentSource { host: String },

    #[error("{host}: invalid upstream '{upstream}': {reason}")]
    InvalidUpstream { host: String, upstream: String, reason: String },

    #[error("{host}: tls_enabled requires both cert_file and key_file")]
    MissingKeyPair { host: String },

    #[error("{host}: tls_enabled but no protocol is enabled in tls_protocols")]
    NoTlsProtocols { host: String },

    #[error("{host}: protocol {protocol} is not supported")]
    UnsupportedProtocol { host: String, protocol: String },

    #[error("{host}: unknown cipher suite '{name}'")]
    UnknownCipherSuite { host: String, name: String },

    #[error("{host}: require_client_cert requires tls_enabled")]
    ClientCertWithoutTls { host: String },

    #[error("{host}: require_client_cert requires client_ca_file")]
    MissingClientCa { host: String },

    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("logging.{stream}.capacity must be greater than zero")]
    ZeroLogCapacity { stream: &'static str },
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.virtual_hosts.is_empty() {
        errors.push(ValidationError::NoVirtualHosts);
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    validate_stream("access", &config.logging.access, &mut errors);
    validate_stream("error", &config.logging.error, &mut errors);

    for host in &config.virtual_hosts {
        validate_host(host, &mut errors);
    }
    validate_routing(&config.virtual_hosts, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_stream(stream: &'static str, config: &LogStreamConfig, errors: &mut Vec<ValidationError>) {
    if config.capacity == 0 {
        errors.push(ValidationError::ZeroLogCapacity { stream });
    }
}

fn validate_host(host: &VirtualHostConfig, errors: &mut Vec<ValidationError>) {
    let label = host.label();

    if host.port == 0 {
        errors.push(ValidationError::InvalidPort { host: label.clone() });
    }

    for name in host.server_name.iter().chain(host.server_aliases.iter()) {
        if normalize_host(name).is_none() {
            errors.push(ValidationError::InvalidServerName {
                host: label.clone(),
                name: name.clone(),
            });
        }
    }

    match (&host.document_root, &host.upstream) {
        (None, None) => errors.push(ValidationError::MissingContentSource { host: label.clone() }),
        (Some(_), Some(_)) => {
            errors.push(ValidationError::ConflictingContentSource { host: label.clone() })
        }
        (None, Some(upstream)) => {
            if let Err(reason) = check_upstream(upstream) {
                errors.push(ValidationError::InvalidUpstream {
                    host: label.clone(),
                    upstream: upstream.clone(),
                    reason,
                });
            }
        }
        (Some(_), None) => {}
    }

    if host.require_client_cert {
        if !host.tls_enabled {
            errors.push(ValidationError::ClientCertWithoutTls { host: label.clone() });
        }
        if host.client_ca_file.is_none() {
            errors.push(ValidationError::MissingClientCa { host: label.clone() });
        }
    }

    if !host.tls_enabled {
        return;
    }

    if host.cert_file.is_none() || host.key_file.is_none() {
        errors.push(ValidationError::MissingKeyPair { host: label.clone() });
    }
    if host.tls_protocols.is_empty() {
        errors.push(ValidationError::NoTlsProtocols { host: label.clone() });
    }
    for protocol in &host.tls_protocols {
        if !protocol.is_supported() {
            errors.push(ValidationError::UnsupportedProtocol {
                host: label.clone(),
                protocol: protocol.to_string(),
            });
        }
    }
    for name in &host.cipher_suites {
        if ciphers::lookup(name).is_none() {
            errors.push(ValidationError::UnknownCipherSuite {
                host: label.clone(),
                name: name.clone(),
            });
        }
    }
}

fn check_upstream(upstream: &str) -> Result<(), String> {
    let url = url::Url::parse(upstream).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("query and fragment are not allowed".to_string());
    }
    Ok(())
}

/// Per-port checks: one default at most, unique names, no TLS/plaintext mix.
fn validate_routing(hosts: &[VirtualHostConfig], errors: &mut Vec<ValidationError>) {
    let mut defaults: HashMap<u16, usize> = HashMap::new();
    let mut names: HashSet<(u16, String)> = HashSet::new();
    let mut reported: HashSet<(u16, String)> = HashSet::new();
    let mut port_modes: HashMap<u16, bool> = HashMap::new();
    let mut mixed: HashSet<u16> = HashSet::new();

    for host in hosts {
        if host.server_name.is_none() {
            *defaults.entry(host.port).or_default() += 1;
        }

        for name in host.server_name.iter().chain(host.server_aliases.iter()) {
            let Some(name) = normalize_host(name) else {
                continue;
            };
            let key = (host.port, name);
            if !names.insert(key.clone()) && reported.insert(key.clone()) {
                errors.push(ValidationError::DuplicateServerName {
                    port: key.0,
                    name: key.1,
                });
            }
        }

        match port_modes.get(&host.port) {
            Some(tls) if *tls != host.tls_enabled => {
                if mixed.insert(host.port) {
                    errors.push(ValidationError::MixedTlsPort { port: host.port });
                }
            }
            Some(_) => {}
            None => {
                port_modes.insert(host.port, host.tls_enabled);
            }
        }
    }

    let mut duplicate_ports: Vec<u16> = defaults
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(port, _)| port)
        .collect();
    duplicate_ports.sort_unstable();
    for port in duplicate_ports {
        errors.push(ValidationError::DuplicateDefault { port });
    }
}
