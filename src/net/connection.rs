//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections so shutdown can drain them
//! - Carry per-connection facts (peer, port, snapshot, TLS session) to request handlers

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::schema::TlsProtocol;
use crate::config::ConfigSnapshot;
use crate::observability::metrics;
use crate::routing::VirtualHost;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough; only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Facts about the negotiated TLS session.
#[derive(Debug, Clone)]
pub struct TlsSession {
    /// Host the connection was routed to from its SNI.
    pub host: Arc<VirtualHost>,
    /// SNI as sent by the client.
    pub sni: Option<String>,
    pub protocol: Option<TlsProtocol>,
    pub cipher_suite: Option<&'static str>,
    pub client_cert_presented: bool,
}

/// Per-connection context attached to every request on the connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    /// Configured port the connection arrived on.
    pub local_port: u16,
    /// Snapshot captured at accept time; kept for the connection's lifetime.
    pub snapshot: Arc<ConfigSnapshot>,
    /// `None` on plaintext ports.
    pub tls: Option<TlsSession>,
}

impl ConnectionContext {
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// Tracks active connections for graceful shutdown.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
    /// Woken whenever the count drops to zero.
    idle: Arc<Notify>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            idle: Arc::clone(&self.idle),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until every connection has closed or `deadline` elapses.
    ///
    /// Returns `true` when the gateway drained completely.
    pub async fn wait_idle(&self, deadline: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(deadline, drained).await.is_ok()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    idle: Arc<Notify>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(remaining);
        if remaining == 0 {
            self.idle.notify_waiters();
        }
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
