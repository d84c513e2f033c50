//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Certificates → Log streams → Start listeners
//!
//! Reload (reload.rs):
//!     SIGHUP / file change → Prepare everything → Swap → Reconcile listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Flush logs → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then certificates, then listeners
//! - Ordered shutdown: stop accept, drain, close logs
//! - Shutdown has timeout: exit after the grace deadline

pub mod reload;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use reload::{ReloadError, Reloader};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{spawn_signal_listener, ControlEvent};
pub use startup::{check_config, CheckReport, Gateway};
