//! Request identification and inspection.
//!
//! # Responsibilities
//! - Generate a request ID (UUID v4) unless the client supplied one
//! - Extract the requested host (`Host` header, or `:authority` on HTTP/2)
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing and access records

use axum::http::{header, HeaderMap, HeaderName, Request, Version};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Header carrying the request ID in both directions.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        Uuid::new_v4().to_string().parse().ok().map(RequestId::new)
    }
}

/// The request ID set by the request-id layer.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Host the client asked for, as sent.
pub fn requested_host<B>(request: &Request<B>) -> Option<&str> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()))
}

/// Protocol token for access records.
pub fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn generates_distinct_uuids() {
        let request = Request::new(Body::empty());
        let mut make = MakeRequestUuid;
        let a = make.make_request_id(&request).unwrap();
        let b = make.make_request_id(&request).unwrap();
        assert_ne!(a.header_value(), b.header_value());
        assert!(Uuid::parse_str(a.header_value().to_str().unwrap()).is_ok());
    }

    #[test]
    fn host_header_wins_over_authority() {
        let request = Request::builder()
            .uri("https://authority.example.com/")
            .header(header::HOST, "header.example.com")
            .body(Body::empty())
            .unwrap();
        assert_eq!(requested_host(&request), Some("header.example.com"));

        let request = Request::builder()
            .uri("https://authority.example.com/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(requested_host(&request), Some("authority.example.com"));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(requested_host(&request), None);
    }

    #[test]
    fn names_protocols() {
        assert_eq!(protocol_name(Version::HTTP_11), "HTTP/1.1");
        assert_eq!(protocol_name(Version::HTTP_2), "HTTP/2.0");
    }
}
