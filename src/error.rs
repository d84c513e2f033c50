//! Top-level startup errors.

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::ListenerError;
use crate::observability::LogSinkError;
use crate::tls::CertificateError;

/// Anything that prevents the gateway from starting.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("certificates: {0}")]
    Certificate(#[from] CertificateError),

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("log streams: {0}")]
    LogSink(#[from] LogSinkError),
}
