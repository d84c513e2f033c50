//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher / listeners / reloads produce:
//!     → records.rs (LogRecord, ErrorRecord; text or JSON lines)
//!     → access_log.rs (per-stream bounded queue.rs + single writer task)
//!     → metrics.rs (counters, gauges, histograms)
//!     → logging.rs (tracing subscriber for diagnostics)
//!
//! Consumers:
//!     → Access / error log destinations (stdout, stderr, append-only files)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows into access records and tracing spans
//! - Logging never fails or stalls a request beyond the configured bound

pub mod access_log;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod records;

pub use access_log::AccessLogger;
pub use queue::{LogQueue, LogSinkError};
pub use records::{ErrorKind, ErrorRecord, LogLine, LogRecord};
