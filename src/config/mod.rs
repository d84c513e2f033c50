//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → snapshot.rs (compile routing table, assign version)
//!     → shared via ArcSwap to listeners and connections
//!
//! On reload signal (SIGHUP or watcher.rs):
//!     loader.rs loads new config
//!     → validation.rs validates
//!     → certificates prepared for every TLS host
//!     → atomic swap of Arc<ConfigSnapshot>
//!     → new connections observe new config, in-flight ones keep theirs
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    GatewayConfig, ListenerConfig, LogStreamConfig, LoggingConfig, ObservabilityConfig,
    OverflowPolicy, RecordFormat, TimeoutConfig, TlsProtocol, VirtualHostConfig,
};
pub use snapshot::{ConfigSnapshot, SnapshotHandle};
pub use validation::ValidationError;
