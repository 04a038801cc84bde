//! Outbound route selection across the proxy pool.
//!
//! - `pool_router` - round-robin selection with failover and reset-on-change
//! - `connector` - `reqwest` clients tunnelled through a pool entry

mod connector;
mod pool_router;

pub use connector::{ConnectorError, ReqwestConnectorFactory};
pub use pool_router::{ConnectorFactory, PoolSource, ProxyRouter, Selection};
