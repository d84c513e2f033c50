//! Diagnostic tracing setup.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Honour `RUST_LOG` over the configured level
//!
//! # Design Decisions
//! - JSON output for log shippers, human format otherwise
//! - Access/error records are a separate sink (see `access_log`)

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LoggingConfig, RecordFormat};

/// Filter used when neither `RUST_LOG` nor the config gives a usable directive.
const FALLBACK_FILTER: &str = "vhost_gateway=info,tower_http=info";

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Install the global subscriber.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TryInitError> {
    let json = config.format == RecordFormat::Json;

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
}
