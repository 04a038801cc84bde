//! Builds `reqwest` clients that tunnel through a pool entry.

use super::pool_router::ConnectorFactory;
use crate::config::ProxyEntry;
use crate::proxy::ClientSettings;
use reqwest::{Client, Proxy, Url};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("proxy entry has no url")]
    MissingUrl,
    #[error("invalid proxy url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported proxy scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
    #[error("failed to build proxied client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Connector factory producing one `reqwest::Client` per proxy.
#[derive(Debug, Clone, Default)]
pub struct ReqwestConnectorFactory {
    settings: ClientSettings,
}

impl ReqwestConnectorFactory {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl ConnectorFactory for ReqwestConnectorFactory {
    type Connector = Client;

    fn connect(&self, entry: &ProxyEntry) -> Result<Client, ConnectorError> {
        let raw = entry.url.trim();
        if raw.is_empty() {
            return Err(ConnectorError::MissingUrl);
        }

        let url = Url::parse(raw).map_err(|e| ConnectorError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConnectorError::UnsupportedScheme(other.to_string())),
        }

        let proxy = Proxy::all(url)?;
        Ok(self.settings.builder().proxy(proxy).build()?)
    }
}
