//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{OverflowPolicy, RecordFormat, TlsProtocol};

    const SAMPLE: &str = r#"
[listener]
bind_host = "127.0.0.1"

[[virtual_host]]
port = 80
document_root = "/var/www/html"

[[virtual_host]]
port = 443
server_name = "www.example.com"
server_aliases = ["example.com"]
document_root = "/var/www/html"
tls_enabled = true
tls_protocols = ["TLSv1.2", "TLSv1.3"]
cert_file = "/etc/ssl/certs/www.example.com.crt"
key_file = "/etc/ssl/private/www.example.com.key"
client_ca_file = "/etc/ssl/certs/clients-ca.crt"
require_client_cert = true

[logging.access]
destination = "/var/log/gateway/access.log"
format = "json"
overflow = "backpressure"
backpressure_timeout_ms = 25
"#;

    #[test]
    fn parses_virtual_hosts_and_log_streams() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.listener.bind_host, "127.0.0.1");
        assert_eq!(config.virtual_hosts.len(), 2);

        let secure = &config.virtual_hosts[1];
        assert_eq!(secure.server_name.as_deref(), Some("www.example.com"));
        assert_eq!(secure.server_aliases, vec!["example.com".to_string()]);
        assert_eq!(secure.tls_protocols, vec![TlsProtocol::Tls12, TlsProtocol::Tls13]);
        assert!(secure.require_client_cert);
        assert_eq!(secure.index_files, vec!["index.html".to_string()]);

        assert_eq!(config.logging.access.format, RecordFormat::Json);
        assert_eq!(config.logging.access.overflow, OverflowPolicy::Backpressure);
        assert_eq!(config.logging.access.backpressure_timeout_ms, 25);
        assert_eq!(config.logging.error.destination, "stderr");
    }

    #[test]
    fn syntax_errors_are_parse_errors() {
        let err = parse_config("[[virtual_host]]\nport = \"eighty\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn semantic_errors_are_validation_errors() {
        let text = r#"
[[virtual_host]]
port = 80
document_root = "/srv/a"

[[virtual_host]]
port = 80
document_root = "/srv/b"
"#;
        match parse_config(text) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors, vec![ValidationError::DuplicateDefault { port: 80 }]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/gateway.toml"));
    }
}
