//! Request dispatch: virtual host selection, content, access records.
//!
//! # Responsibilities
//! - Bind each request to a virtual host (SNI host on TLS, `Host` header otherwise)
//! - Serve static content or forward to the host's upstream
//! - Emit exactly one access record per request and an error record per failure
//!
//! # Data Flow
//! ```text
//! Request (+ ConnectionContext extension)
//!     → select_virtual_host (421 / 404 on mismatch)
//!     → files::serve | proxy::forward (bounded by the request timeout)
//!     → LogRecord (+ ErrorRecord) → AccessLogger
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use axum::Extension;
use chrono::Utc;

use crate::http::proxy::UpstreamClient;
use crate::http::{files, request, response};
use crate::net::ConnectionContext;
use crate::observability::{metrics, AccessLogger, ErrorKind, ErrorRecord, LogRecord};
use crate::routing::{HostKey, VirtualHost};

/// Why a request could not be bound to a virtual host.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no virtual host for {} on port {port}", .host.as_deref().unwrap_or("<no host>"))]
    NoMatch { host: Option<String>, port: u16 },

    #[error("host {requested} is not served by this connection (bound to {connection})")]
    Misdirected { requested: String, connection: HostKey },
}

impl RoutingError {
    pub fn status(&self) -> StatusCode {
        match self {
            RoutingError::NoMatch { .. } => StatusCode::NOT_FOUND,
            RoutingError::Misdirected { .. } => StatusCode::MISDIRECTED_REQUEST,
        }
    }
}

/// State shared by every request.
#[derive(Debug, Clone)]
pub struct DispatchState {
    pub logger: AccessLogger,
    pub upstream: UpstreamClient,
}

/// Pick the virtual host that serves a request.
///
/// A TLS connection is bound to the host its SNI routed to; a `Host` header
/// that routes anywhere else is refused. Plaintext connections route on the
/// `Host` header alone.
pub fn select_virtual_host(
    context: &ConnectionContext,
    host_header: Option<&str>,
) -> Result<Arc<VirtualHost>, RoutingError> {
    let router = context.snapshot.router();
    let port = context.local_port;

    match &context.tls {
        Some(session) => {
            let Some(requested) = host_header else {
                return Ok(Arc::clone(&session.host));
            };
            match router.resolve(port, Some(requested)).into_host() {
                Some(host) if host.key() == session.host.key() => Ok(host),
                _ => Err(RoutingError::Misdirected {
                    requested: requested.to_string(),
                    connection: session.host.key().clone(),
                }),
            }
        }
        None => router
            .resolve(port, host_header)
            .into_host()
            .ok_or_else(|| RoutingError::NoMatch {
                host: host_header.map(str::to_string),
                port,
            }),
    }
}

struct Outcome {
    response: Response,
    error: Option<ErrorRecord>,
}

impl Outcome {
    fn ok(response: Response) -> Self {
        Self { response, error: None }
    }
}

async fn serve_host(
    state: &DispatchState,
    context: &ConnectionContext,
    host: &VirtualHost,
    request: Request,
) -> Outcome {
    if let Some(root) = host.document_root() {
        let method = request.method().clone();
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        return match files::serve(root, host.index_files(), &method, &path, request.headers()).await {
            Ok(response) => Outcome::ok(response),
            Err(err) => {
                let error = err.is_server_error().then(|| {
                    ErrorRecord::new(ErrorKind::Io, format!("serving {}", path), &err)
                });
                Outcome {
                    response: err.into_response(),
                    error,
                }
            }
        };
    }

    if let Some(upstream) = host.upstream() {
        return match state
            .upstream
            .forward(upstream, request, context.peer_addr, context.is_tls())
            .await
        {
            Ok(response) => Outcome::ok(response),
            Err(err) => Outcome {
                response: response::status_page(StatusCode::BAD_GATEWAY),
                error: Some(ErrorRecord::new(
                    ErrorKind::Upstream,
                    format!("forwarding to {}", upstream),
                    &err,
                )),
            },
        };
    }

    // Validation guarantees one content source; keep a safe answer anyway.
    Outcome::ok(response::status_page(StatusCode::NOT_FOUND))
}

/// Fallback handler for every request on every port.
pub async fn dispatch(
    State(state): State<DispatchState>,
    Extension(context): Extension<Arc<ConnectionContext>>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let method: Method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let protocol = request::protocol_name(request.version());
    let request_id = request::request_id(request.headers());
    let host_header = request::requested_host(&request).map(str::to_string);

    let (vhost, outcome) = match select_virtual_host(&context, host_header.as_deref()) {
        Ok(host) => {
            let timeout = Duration::from_secs(context.snapshot.config().timeouts.request_secs);
            let outcome = match tokio::time::timeout(timeout, serve_host(&state, &context, &host, request)).await {
                Ok(outcome) => outcome,
                Err(_) => Outcome {
                    response: response::status_page(StatusCode::REQUEST_TIMEOUT),
                    error: None,
                },
            };
            (host.key().to_string(), outcome)
        }
        Err(err) => {
            tracing::debug!(
                request_id = request_id.as_deref().unwrap_or("-"),
                error = %err,
                "Request not routed"
            );
            let record = ErrorRecord::new(ErrorKind::Routing, format!("{} {}", method, target), &err);
            (
                format!("-:{}", context.local_port),
                Outcome {
                    response: response::status_page(err.status()),
                    error: Some(record),
                },
            )
        }
    };

    let status = outcome.response.status();
    let bytes_sent = response::bytes_sent(&method, &outcome.response);

    if let Some(error) = outcome.error {
        let error = error.with_client(context.peer_addr).with_server(vhost.clone());
        tracing::warn!(
            request_id = request_id.as_deref().unwrap_or("-"),
            kind = %error.kind,
            cause = %error.cause,
            "Request failed"
        );
        state.logger.record_error(error).await;
    }

    let (server_name, port) = split_label(&vhost, context.local_port);
    state
        .logger
        .record(LogRecord {
            timestamp: Utc::now(),
            client_addr: context.peer_addr,
            server_name,
            port,
            method: method.to_string(),
            path: target,
            protocol: protocol.to_string(),
            status: status.as_u16(),
            bytes_sent,
            duration_ms: start.elapsed().as_millis() as u64,
            request_id,
        })
        .await;
    metrics::record_request(&vhost, status.as_u16(), start);

    outcome.response
}

/// `"name:port"` → (`name`, port).
fn split_label(label: &str, fallback_port: u16) -> (String, u16) {
    match label.rsplit_once(':') {
        Some((name, port)) => (name.to_string(), port.parse().unwrap_or(fallback_port)),
        None => (label.to_string(), fallback_port),
    }
}
