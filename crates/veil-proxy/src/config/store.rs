//! Runtime owner of the reloadable rule and pool files.

use super::pool::{load_pool, ProxyEntry};
use super::rules::load_rules;
use super::Config;
use crate::obfuscation::TransformContext;
use crate::routing::PoolSource;
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::info;

/// Counts reported after a (re)load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub rules: usize,
    pub forward: usize,
    pub reverse: usize,
    pub proxies: usize,
}

/// Holds the current dictionaries and proxy pool, both replaced wholesale by
/// [`ConfigStore::reload`]. The file reads happen here and nowhere else.
pub struct ConfigStore {
    rules_file: Option<PathBuf>,
    pool_file: Option<PathBuf>,
    transforms: TransformContext,
    pool: RwLock<Arc<Vec<ProxyEntry>>>,
}

impl ConfigStore {
    /// Create the store and perform the initial load.
    pub fn open(rules_file: Option<PathBuf>, pool_file: Option<PathBuf>) -> Self {
        let store = Self {
            rules_file,
            pool_file,
            transforms: TransformContext::disabled(),
            pool: RwLock::new(Arc::new(Vec::new())),
        };
        store.reload();
        store
    }

    pub fn from_config(config: &Config) -> Self {
        Self::open(
            config.obfuscation.rules_file.clone(),
            config.proxy_pool.file.clone(),
        )
    }

    /// Re-read both files and swap in the results.
    pub fn reload(&self) -> ReloadSummary {
        let rules = load_rules(self.rules_file.as_deref());
        let dictionaries = self.transforms.reload(&rules);

        let pool = Arc::new(load_pool(self.pool_file.as_deref()));
        let proxies = pool.len();
        *self.pool.write() = pool;

        let summary = ReloadSummary {
            rules: rules.len(),
            forward: dictionaries.forward.len(),
            reverse: dictionaries.reverse.len(),
            proxies,
        };
        info!(
            "Configuration loaded: {} rules ({} forward, {} reverse), {} proxies",
            summary.rules, summary.forward, summary.reverse, summary.proxies
        );
        summary
    }

    /// [`reload`](Self::reload) on tokio's blocking pool, since the files are
    /// read with `std::fs`.
    pub async fn reload_blocking(self: Arc<Self>) -> Result<ReloadSummary, JoinError> {
        tokio::task::spawn_blocking(move || self.reload()).await
    }

    pub fn transforms(&self) -> &TransformContext {
        &self.transforms
    }

    pub fn pool(&self) -> Arc<Vec<ProxyEntry>> {
        Arc::clone(&self.pool.read())
    }
}

impl PoolSource for ConfigStore {
    fn proxy_pool(&self) -> Arc<Vec<ProxyEntry>> {
        self.pool()
    }
}
