use super::client::{create_direct_client, ClientSettings};
use crate::analytics::AuthFailureLog;
use crate::config::{Config, ConfigStore, UpstreamConfig};
use crate::routing::{PoolSource, ProxyRouter, ReqwestConnectorFactory};
use std::sync::Arc;

/// Shared state for every connection served by one proxy instance.
pub struct ProxyState {
    pub upstream: UpstreamConfig,
    pub store: Arc<ConfigStore>,
    pub router: ProxyRouter<ReqwestConnectorFactory>,
    pub direct_client: reqwest::Client,
    pub auth_failures: Option<Arc<AuthFailureLog>>,
}

impl ProxyState {
    pub fn new(config: &Config, store: Arc<ConfigStore>) -> Result<Self, anyhow::Error> {
        let settings = ClientSettings::from_upstream(&config.upstream);
        let direct_client = create_direct_client(&settings)?;

        let source: Arc<dyn PoolSource> = store.clone();
        let router = ProxyRouter::new(source, ReqwestConnectorFactory::new(settings));

        Ok(Self {
            upstream: config.upstream.clone(),
            store,
            router,
            direct_client,
            auth_failures: AuthFailureLog::from_config(&config.analytics).map(Arc::new),
        })
    }

    /// Full upstream URL for a client path and query.
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.upstream.base_url(), path_and_query)
    }
}

/// Extracted request metadata
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: hyper::Method,
    pub uri: hyper::Uri,
    pub headers: hyper::HeaderMap,
}

impl RequestInfo {
    pub fn from_parts(parts: &hyper::http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }

    pub fn path_and_query(&self) -> &str {
        self.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }
}
