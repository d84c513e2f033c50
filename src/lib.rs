//! Virtual-host gateway library.
//!
//! Terminates TLS with per-host certificates and protocol policy, routes
//! connections and requests to virtual hosts by SNI and `Host` header, serves
//! static content or forwards to an upstream origin, and writes ordered
//! access and error logs.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod tls;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use lifecycle::{Gateway, Shutdown};
