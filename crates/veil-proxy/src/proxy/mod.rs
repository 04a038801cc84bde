//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and main run loop
//! - `handler` - admin routes and request dispatch
//! - `forwarding` - obfuscated forwarding with pool failover
//! - `client` - HTTP client creation and configuration
//! - `headers` - header filtering and Veil response headers
//! - `context` - state shared by all connections

mod client;
mod context;
mod forwarding;
mod handler;
mod headers;
mod server;

pub use client::{create_direct_client, ClientSettings};
pub use context::{ProxyState, RequestInfo};
pub use forwarding::{
    error_response, send_with_failover, BoxError, ForwardError, ProxyBody, Route,
};
pub use handler::ADMIN_PREFIX;
pub use headers::X_VEIL_ROUTE;
pub use server::ProxyServer;
