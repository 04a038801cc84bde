// Library exports for the binary and integration tests

pub mod analytics;
pub mod config;
pub mod metrics;
pub mod obfuscation;
pub mod proxy;
pub mod routing;
