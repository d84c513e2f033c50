//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Create the Axum app (dispatcher + request ID, tracing middleware)
//! - Own one accept loop per bound port and reconcile them on reload
//! - Terminate TLS on TLS ports, then serve HTTP/1.1 and HTTP/2 per connection
//! - Log handshake failures to the error stream
//! - Drain connections on shutdown
//!
//! # Design Decisions
//! - Connections are served with hyper-util's auto builder so the
//!   per-connection context (peer, port, snapshot, TLS session) can be
//!   attached to every request as an extension
//! - Each connection keeps the snapshot it was accepted under

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Request;
use axum::routing::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::{ConfigSnapshot, SnapshotHandle};
use crate::http::dispatcher::{dispatch, DispatchState};
use crate::http::proxy::UpstreamClient;
use crate::http::request::{MakeRequestUuid, X_REQUEST_ID};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{
    accept_tls, connection_limit, ConnectionContext, ConnectionPermit, ConnectionTracker,
    HandshakeError, Listener, ListenerError,
};
use crate::observability::{metrics, AccessLogger, ErrorKind, ErrorRecord};
use crate::tls::CertificateStore;

/// Back-off after an accept error (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Build the Axum app with all middleware layers.
pub fn build_app(state: DispatchState) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
}

struct Shared {
    snapshots: Arc<SnapshotHandle>,
    certificates: Arc<CertificateStore>,
    logger: AccessLogger,
    app: Router,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    connection_limit: Arc<Semaphore>,
    upstream: UpstreamClient,
}

struct RunningListener {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The gateway's listeners and the connections they accept.
pub struct GatewayServer {
    shared: Arc<Shared>,
    bind_host: String,
    listeners: tokio::sync::Mutex<HashMap<u16, RunningListener>>,
}

impl GatewayServer {
    pub fn new(
        snapshots: Arc<SnapshotHandle>,
        certificates: Arc<CertificateStore>,
        logger: AccessLogger,
    ) -> Self {
        let snapshot = snapshots.load();
        let config = snapshot.config();

        let upstream = UpstreamClient::new(Duration::from_secs(config.timeouts.upstream_connect_secs));
        let state = DispatchState {
            logger: logger.clone(),
            upstream: upstream.clone(),
        };

        Self {
            bind_host: config.listener.bind_host.clone(),
            shared: Arc::new(Shared {
                app: build_app(state),
                connection_limit: connection_limit(config.listener.max_connections),
                snapshots,
                certificates,
                logger,
                tracker: ConnectionTracker::new(),
                shutdown: Shutdown::new(),
                upstream,
            }),
            listeners: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Apply the upstream connect timeout of `snapshot` to later forwards.
    pub fn refresh_upstream(&self, snapshot: &ConfigSnapshot) -> bool {
        let connect_timeout = Duration::from_secs(snapshot.config().timeouts.upstream_connect_secs);
        self.shared.upstream.reconfigure(connect_timeout)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        self.shared.upstream.connect_timeout()
    }

    /// Bind every port of `snapshot` that has no running listener yet.
    ///
    /// All-or-nothing: on the first failure the sockets bound so far are
    /// dropped and nothing is started.
    pub async fn bind_missing(&self, snapshot: &ConfigSnapshot) -> Result<Vec<Listener>, ListenerError> {
        let running = self.listeners.lock().await;
        let mut bound = Vec::new();
        for (port, _) in snapshot.router().ports() {
            if running.contains_key(&port) {
                continue;
            }
            let listener = Listener::bind(
                &self.bind_host,
                port,
                Arc::clone(&self.shared.connection_limit),
            )
            .await?;
            bound.push(listener);
        }
        Ok(bound)
    }

    /// Spawn accept loops for freshly bound listeners.
    pub async fn start(&self, listeners: Vec<Listener>) {
        let mut running = self.listeners.lock().await;
        for listener in listeners {
            let port = listener.port();
            let local_addr = match listener.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::error!(port = port, error = %e, "Listener lost its address");
                    continue;
                }
            };
            let (stop, stop_rx) = watch::channel(false);
            let task = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener, stop_rx));
            running.insert(port, RunningListener { local_addr, stop, task });
        }
    }

    /// Stop listeners whose port no longer appears in `snapshot`.
    ///
    /// Connections already accepted on them keep running.
    pub async fn retire_unused(&self, snapshot: &ConfigSnapshot) {
        let mut running = self.listeners.lock().await;
        let wanted: Vec<u16> = snapshot.router().ports().map(|(port, _)| port).collect();
        let retired: Vec<u16> = running
            .keys()
            .filter(|port| !wanted.contains(port))
            .copied()
            .collect();

        for port in retired {
            if let Some(listener) = running.remove(&port) {
                let _ = listener.stop.send(true);
                if let Err(e) = listener.task.await {
                    tracing::warn!(port = port, error = %e, "Accept loop ended abnormally");
                }
                tracing::info!(port = port, "Listener stopped");
            }
        }
    }

    /// Bring the listener set in line with the current snapshot.
    pub async fn sync_listeners(&self) -> Result<(), ListenerError> {
        let snapshot = self.shared.snapshots.load();
        let bound = self.bind_missing(&snapshot).await?;
        self.start(bound).await;
        self.retire_unused(&snapshot).await;
        Ok(())
    }

    /// Address a configured port is actually bound to.
    pub async fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.listeners.lock().await.get(&port).map(|l| l.local_addr)
    }

    /// Ports with a running accept loop.
    pub async fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.lock().await.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub fn active_connections(&self) -> u64 {
        self.shared.tracker.active_count()
    }

    /// Stop accepting, ask connections to finish, and wait up to `grace`.
    ///
    /// Returns `true` when every connection closed in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shared.shutdown.trigger();

        let listeners: Vec<(u16, RunningListener)> = self.listeners.lock().await.drain().collect();
        for (port, listener) in listeners {
            if let Err(e) = listener.task.await {
                tracing::warn!(port = port, error = %e, "Accept loop ended abnormally");
            }
        }

        let drained = self.shared.tracker.wait_idle(grace).await;
        if !drained {
            tracing::warn!(
                remaining = self.shared.tracker.active_count(),
                "Shutdown deadline reached with open connections"
            );
        }
        drained
    }
}

/// Resolves once the listener is told to stop. The `watch::Ref` never escapes.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

async fn accept_loop(shared: Arc<Shared>, listener: Listener, mut stop: watch::Receiver<bool>) {
    let port = listener.port();
    let mut shutdown = shared.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = stopped(&mut stop) => break,
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    tokio::spawn(serve_connection(Arc::clone(&shared), stream, peer, port, permit));
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(port = port, error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                }
            }
        }
    }
    tracing::debug!(port = port, "Accept loop stopped");
}

async fn serve_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer: SocketAddr,
    port: u16,
    _permit: ConnectionPermit,
) {
    let guard = shared.tracker.track();
    let snapshot = shared.snapshots.load();
    let _ = stream.set_nodelay(true);

    let mut context = ConnectionContext {
        id: guard.id(),
        peer_addr: peer,
        local_port: port,
        snapshot: Arc::clone(&snapshot),
        tls: None,
    };

    if snapshot.router().is_tls_port(port) {
        let timeout = Duration::from_secs(snapshot.config().timeouts.handshake_secs);
        match accept_tls(stream, port, &snapshot, &shared.certificates, timeout).await {
            Ok((tls_stream, session)) => {
                context.tls = Some(session);
                serve_http(&shared, TokioIo::new(tls_stream), context).await;
            }
            Err(err) => record_handshake_failure(&shared, peer, port, err).await,
        }
    } else {
        serve_http(&shared, TokioIo::new(stream), context).await;
    }
}

async fn record_handshake_failure(shared: &Shared, peer: SocketAddr, port: u16, err: HandshakeError) {
    metrics::record_handshake_failure(err.reason());
    tracing::debug!(peer_addr = %peer, port = port, error = %err, "TLS handshake failed");

    let kind = match &err {
        HandshakeError::NoRoute { .. } => ErrorKind::Routing,
        HandshakeError::Certificate { .. } => ErrorKind::Certificate,
        _ => ErrorKind::Handshake,
    };
    let mut record = ErrorRecord::new(kind, format!("TLS handshake on port {}", port), &err)
        .with_client(peer);
    if let Some(server) = err.server_name() {
        record = record.with_server(server);
    }
    shared.logger.record_error(record).await;
}

async fn serve_http<I>(shared: &Shared, io: TokioIo<I>, context: ConnectionContext)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = context.id;
    let idle_limit = Duration::from_secs(context.snapshot.config().timeouts.request_secs);
    let context = Arc::new(context);
    let first_request = Arc::new(Notify::new());

    let app = shared.app.clone();
    let seen = Arc::clone(&first_request);
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        seen.notify_one();
        request.extensions_mut().insert(Arc::clone(&context));
        app.clone().oneshot(request)
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(idle_limit);
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(idle_limit)
        .keep_alive_timeout(idle_limit);

    let connection = builder.serve_connection(io, service);
    tokio::pin!(connection);

    let mut shutdown = shared.shutdown.subscribe();
    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
        _ = silent_for(&first_request, idle_limit) => {
            tracing::debug!(connection_id = %connection_id, "No request within the idle limit, closing");
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };

    if let Err(e) = result {
        tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
    }
}

/// Resolves only if no request arrives within `limit`.
async fn silent_for(first_request: &Notify, limit: Duration) {
    if tokio::time::timeout(limit, first_request.notified()).await.is_ok() {
        std::future::pending::<()>().await;
    }
}
