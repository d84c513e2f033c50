//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming connection / request (port, SNI or Host header)
//!     → matcher.rs (normalize the name)
//!     → router.rs (exact name on port → port default → NoMatch)
//!     → Return: VirtualHost or NoMatch
//!
//! Route Compilation (per snapshot):
//!     VirtualHostConfig[]
//!     → Validate (no duplicate names, at most one default per port)
//!     → Build (port, name) map and per-port defaults
//!     → Freeze as immutable VirtualHostRouter
//! ```
//!
//! # Design Decisions
//! - Routes compiled per snapshot, immutable at runtime
//! - Exact names only; no wildcard or regex matching
//! - Deterministic: same input always matches same host

pub mod matcher;
pub mod router;

pub use matcher::{normalize_host, HostKey};
pub use router::{Resolution, VirtualHost, VirtualHostRouter};
