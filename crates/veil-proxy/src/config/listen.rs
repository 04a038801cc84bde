//! Listener and analytics configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Bind address (default: 127.0.0.1)
    #[serde(default = "default_listen_host")]
    pub host: IpAddr,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl ListenConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
        }
    }
}

fn default_listen_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_listen_port() -> u16 {
    8080
}

/// Auth-failure analytics side channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_enabled")]
    pub enabled: bool,
    /// Width of one counting bucket in seconds
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,
    /// Buckets retained before the oldest is evicted
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_analytics_enabled(),
            bucket_secs: default_bucket_secs(),
            max_buckets: default_max_buckets(),
        }
    }
}

fn default_analytics_enabled() -> bool {
    true
}

fn default_bucket_secs() -> u64 {
    3600
}

fn default_max_buckets() -> usize {
    168
}
