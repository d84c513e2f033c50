//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper-util auto builder, ConnectionContext extension)
//!     → request.rs (request ID, requested host)
//!     → dispatcher.rs (virtual host selection, access/error records)
//!     → files.rs (document root) | proxy.rs (upstream origin)
//!     → response.rs (status pages, header hygiene)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod files;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{dispatch, select_virtual_host, DispatchState, RoutingError};
pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{build_app, GatewayServer};
