//! HTTP client creation and configuration.
//!
//! Every outbound route gets its own `reqwest::Client`: one direct client, and
//! one per usable pool entry (built lazily by the router).

use crate::config::UpstreamConfig;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

/// Settings shared by every client the proxy builds.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub tls_skip_verify: bool,
}

impl ClientSettings {
    pub fn from_upstream(upstream: &UpstreamConfig) -> Self {
        Self {
            timeout: Duration::from_secs(upstream.timeout_secs),
            connect_timeout: Duration::from_secs(upstream.connect_timeout_secs),
            tls_skip_verify: upstream.tls_skip_verify,
        }
    }

    pub(crate) fn builder(&self) -> reqwest::ClientBuilder {
        // Automatic decompression stays off; bodies are rewritten as sent
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(self.tls_skip_verify)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
            tls_skip_verify: false,
        }
    }
}

/// Create the client used when no proxy is configured or all proxies failed.
///
/// Environment proxy variables are ignored so that "direct" means direct.
pub fn create_direct_client(settings: &ClientSettings) -> Result<Client, reqwest::Error> {
    if settings.tls_skip_verify {
        warn!("TLS certificate verification DISABLED for the upstream (development/testing only)");
    }

    let client = settings.builder().no_proxy().build()?;

    info!(
        "Direct client configured: timeout={}s, connect_timeout={}s",
        settings.timeout.as_secs(),
        settings.connect_timeout.as_secs()
    );

    Ok(client)
}
