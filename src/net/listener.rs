//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind one socket per virtual-host port
//! - Accept incoming TCP connections
//! - Enforce max_connections across all ports via one shared semaphore
//! - Graceful handling of accept errors

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind { address: String, source: std::io::Error },
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// The connection limit was closed; the listener is shutting down.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind { address, source } => {
                write!(f, "Failed to bind {}: {}", address, source)
            }
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Connection limit closed"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } | ListenerError::Accept(source) => Some(source),
            ListenerError::Closed => None,
        }
    }
}

/// Create the semaphore shared by every listener of a gateway.
pub fn connection_limit(max_connections: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(max_connections))
}

/// A bounded TCP listener for one virtual-host port.
///
/// When the shared limit is reached, accepting waits until a slot is
/// released, so pending clients queue in the kernel backlog.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Configured port (what routing keys on).
    port: u16,
    /// Semaphore shared with every other listener.
    connection_limit: Arc<Semaphore>,
}

impl Listener {
    /// Bind `bind_host:port`.
    pub async fn bind(
        bind_host: &str,
        port: u16,
        connection_limit: Arc<Semaphore>,
    ) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind((bind_host, port))
            .await
            .map_err(|source| ListenerError::Bind {
                address: format!("{}:{}", bind_host, port),
                source,
            })?;

        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            address: format!("{}:{}", bind_host, port),
            source,
        })?;

        tracing::info!(
            address = %local_addr,
            port = port,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            port,
            connection_limit,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            port = self.port,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool, even if
/// the connection task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_are_shared_and_released_on_drop() {
        let limit = connection_limit(1);
        let listener = Listener::bind("127.0.0.1", 0, Arc::clone(&limit)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        let _second = TcpStream::connect(addr).await.unwrap();
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;
        assert!(blocked.is_err(), "accept must wait while the limit is exhausted");

        drop(permit);
        assert_eq!(limit.available_permits(), 1);
        let accepted = tokio::time::timeout(std::time::Duration::from_secs(2), listener.accept()).await;
        assert!(matches!(accepted, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn closed_limit_stops_accepting() {
        let limit = connection_limit(4);
        let listener = Listener::bind("127.0.0.1", 0, Arc::clone(&limit)).await.unwrap();
        limit.close();
        assert!(matches!(listener.accept().await, Err(ListenerError::Closed)));
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let limit = connection_limit(4);
        let first = Listener::bind("127.0.0.1", 0, Arc::clone(&limit)).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = Listener::bind("127.0.0.1", port, limit).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }
}
