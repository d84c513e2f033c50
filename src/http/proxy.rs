//! Upstream forwarding for virtual hosts configured with `upstream`.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the upstream origin (plus optional path prefix)
//! - Strip hop-by-hop headers in both directions
//! - Add `X-Forwarded-For`, `X-Forwarded-Proto` and `X-Forwarded-Host`
//!
//! Bodies are streamed in both directions; nothing is buffered.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use axum::body::Body;
use axum::extract::Request;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderName, HeaderValue, Uri};
use axum::response::Response;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::http::request::X_REQUEST_ID;
use crate::http::response::strip_hop_by_hop;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Upstream forwarding failures. All map to `502 Bad Gateway`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream '{upstream}': {reason}")]
    InvalidUpstream { upstream: String, reason: String },

    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),
}

/// Shared HTTP client for upstream origins. Clones share one pool, which is
/// replaced when the connect timeout changes.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    pool: Arc<ArcSwap<Pool>>,
}

#[derive(Debug)]
struct Pool {
    connect_timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl Pool {
    fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        Self {
            connect_timeout,
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl UpstreamClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(ArcSwap::from_pointee(Pool::new(connect_timeout))),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.pool.load().connect_timeout
    }

    /// Rebuild the pool if `connect_timeout` differs. Requests already in
    /// flight finish on the old pool. Returns whether a rebuild happened.
    pub fn reconfigure(&self, connect_timeout: Duration) -> bool {
        if self.connect_timeout() == connect_timeout {
            return false;
        }
        self.pool.store(Arc::new(Pool::new(connect_timeout)));
        tracing::info!(connect_timeout = ?connect_timeout, "Upstream client rebuilt");
        true
    }

    /// Forward `request` to `upstream` on behalf of `peer`.
    pub async fn forward(
        &self,
        upstream: &str,
        request: Request,
        peer: SocketAddr,
        tls: bool,
    ) -> Result<Response, ProxyError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = upstream_uri(upstream, &parts.uri)?;

        let original_host = parts.headers.remove(axum::http::header::HOST);
        strip_hop_by_hop(&mut parts.headers);

        let forwarded_for = match parts
            .headers
            .get(&X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, peer.ip()),
            None => peer.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            parts.headers.insert(X_FORWARDED_FOR, value);
        }
        parts.headers.insert(
            X_FORWARDED_PROTO,
            HeaderValue::from_static(if tls { "https" } else { "http" }),
        );
        if let Some(host) = original_host {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }
        // The upstream sees HTTP/1.1 regardless of the client protocol.
        parts.version = axum::http::Version::HTTP_11;

        tracing::debug!(
            upstream = %parts.uri,
            request_id = parts.headers.get(&X_REQUEST_ID).and_then(|v| v.to_str().ok()).unwrap_or("-"),
            "Forwarding request"
        );

        let client = self.pool.load().client.clone();
        let response = client
            .request(Request::from_parts(parts, body))
            .await?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Join the upstream origin (and its path prefix) with the client's path and query.
fn upstream_uri(upstream: &str, original: &Uri) -> Result<Uri, ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidUpstream {
        upstream: upstream.to_string(),
        reason,
    };

    let url = Url::parse(upstream).map_err(|e| invalid(e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing host".to_string()))?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let prefix = url.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");

    Uri::builder()
        .scheme(url.scheme())
        .authority(authority)
        .path_and_query(format!("{}{}", prefix, path_and_query))
        .build()
        .map_err(|e| invalid(e.to_string()))
}
