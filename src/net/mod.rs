//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, shared connection limit)
//!     → tls.rs (TLS ports: read ClientHello, route SNI, per-host handshake)
//!     → connection.rs (ConnectionContext, lifecycle tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Whether a port speaks TLS is read from the connection's snapshot

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionContext, ConnectionGuard, ConnectionId, ConnectionTracker, TlsSession};
pub use listener::{connection_limit, ConnectionPermit, Listener, ListenerError};
pub use tls::{accept_tls, HandshakeError};
