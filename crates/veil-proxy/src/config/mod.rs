//! Configuration types for the Veil proxy.

mod listen;
mod pool;
mod rules;
mod store;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

// Re-export all types for library consumers
pub use listen::{AnalyticsConfig, ListenConfig};
pub use pool::{load_pool, parse_pool, read_pool_file, PoolFileError, ProxyEntry, ProxyPoolConfig};
pub use rules::{load_rules, parse_rule_list, read_rules_file, ObfuscationConfig, RuleListError};
pub use store::{ConfigStore, ReloadSummary};
pub use upstream::UpstreamConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    /// The API every request is forwarded to
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub obfuscation: ObfuscationConfig,

    #[serde(default)]
    pub proxy_pool: ProxyPoolConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

impl Config {
    /// Minimal configuration forwarding to `upstream_url` with everything else defaulted.
    pub fn new(upstream_url: impl Into<String>) -> Self {
        Self {
            listen: ListenConfig::default(),
            upstream: UpstreamConfig::new(upstream_url),
            obfuscation: ObfuscationConfig::default(),
            proxy_pool: ProxyPoolConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }

    /// Load a YAML config file. Relative rule and pool paths are resolved
    /// against the directory containing the config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {e}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.upstream.validate().map_err(|e| anyhow::anyhow!(e))?;

        if self.analytics.enabled {
            if self.analytics.bucket_secs == 0 {
                anyhow::bail!("analytics.bucket_secs must be greater than zero");
            }
            if self.analytics.max_buckets == 0 {
                anyhow::bail!("analytics.max_buckets must be greater than zero");
            }
        }

        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.obfuscation.rules_file,
            &mut self.proxy_pool.file,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}
