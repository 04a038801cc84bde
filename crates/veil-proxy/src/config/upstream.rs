//! Upstream API configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream API, e.g. `https://api.example.com`
    pub url: String,
    /// Whole-request timeout; generous because responses may stream for minutes
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Skip TLS certificate verification (for self-signed certs in dev/test)
    #[serde(default)]
    pub tls_skip_verify: bool,
    /// Proxy selections tried per request before falling back
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Connect directly when no pool proxy could carry the request
    #[serde(default = "default_direct_fallback")]
    pub direct_fallback: bool,
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            tls_skip_verify: false,
            max_attempts: default_max_attempts(),
            direct_fallback: default_direct_fallback(),
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Validate that the upstream configuration is usable
    pub fn validate(&self) -> Result<(), String> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| format!("Invalid upstream url '{}': {}", self.url, e))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(format!(
                    "Unsupported upstream scheme '{other}'. Currently supported: http, https"
                ))
            }
        }
        if self.max_attempts == 0 {
            return Err("upstream.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_attempts() -> usize {
    2
}

fn default_direct_fallback() -> bool {
    true
}
