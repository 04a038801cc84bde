//! Round-robin proxy selection with failover.
//!
//! The pool is re-read from its [`PoolSource`] on every call. When the pool's
//! content differs from the previous call the rotation restarts at index 0.
//! Each call tries at most `pool.len()` entries, starting at the cursor; the
//! cursor moves to the entry after the one that succeeded.

use super::connector::ConnectorError;
use crate::config::ProxyEntry;
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Supplies the current proxy pool.
pub trait PoolSource: Send + Sync {
    fn proxy_pool(&self) -> Arc<Vec<ProxyEntry>>;
}

/// Builds the connector used to reach the upstream through one pool entry.
pub trait ConnectorFactory: Send + Sync {
    type Connector: Clone + Send + Sync;

    fn connect(&self, entry: &ProxyEntry) -> Result<Self::Connector, ConnectorError>;
}

/// Outcome of one selection.
#[derive(Debug, Clone)]
pub enum Selection<C> {
    /// No pool is configured; connect directly.
    Direct,
    /// A usable proxy was found.
    Selected {
        connector: C,
        entry: ProxyEntry,
        index: usize,
    },
    /// Every entry was tried and none produced a connector.
    Exhausted { attempted: usize },
}

impl<C> Selection<C> {
    pub fn entry(&self) -> Option<&ProxyEntry> {
        match self {
            Selection::Selected { entry, .. } => Some(entry),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Selection::Exhausted { .. })
    }
}

struct RotationState<C> {
    cursor: usize,
    /// Pool seen by the previous call, compared structurally
    fingerprint: Option<Arc<Vec<ProxyEntry>>>,
    /// Connectors built for the current pool, by index
    connectors: HashMap<usize, C>,
}

impl<C: Clone> RotationState<C> {
    fn observe(&mut self, pool: &Arc<Vec<ProxyEntry>>) {
        if self.is_current(pool) {
            return;
        }
        if self.fingerprint.is_some() {
            info!(
                "Proxy pool changed ({} entries), restarting rotation",
                pool.len()
            );
        }
        self.cursor = 0;
        self.fingerprint = Some(Arc::clone(pool));
        self.connectors.clear();
    }

    fn is_current(&self, pool: &Arc<Vec<ProxyEntry>>) -> bool {
        self.fingerprint
            .as_ref()
            .is_some_and(|previous| previous.as_slice() == pool.as_slice())
    }

    /// First index at or after the cursor this call has not tried yet.
    fn next_untried(&self, tried: &[bool]) -> Option<usize> {
        let len = tried.len();
        let start = self.cursor % len;
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|index| !tried[*index])
    }
}

/// Selects the next usable proxy for each outbound request.
pub struct ProxyRouter<F: ConnectorFactory> {
    source: Arc<dyn PoolSource>,
    factory: F,
    state: Mutex<RotationState<F::Connector>>,
}

impl<F: ConnectorFactory> ProxyRouter<F> {
    pub fn new(source: Arc<dyn PoolSource>, factory: F) -> Self {
        Self {
            source,
            factory,
            state: Mutex::new(RotationState {
                cursor: 0,
                fingerprint: None,
                connectors: HashMap::new(),
            }),
        }
    }

    /// Pick the proxy for a request to `target_url`.
    ///
    /// The cursor, fingerprint and connector cache are only touched under the
    /// lock, so concurrent callers always see an in-bounds cursor. Connectors
    /// are built with the lock released and cached only if the pool did not
    /// change in the meantime.
    pub fn select_connector(&self, target_url: &str) -> Selection<F::Connector> {
        let pool = self.source.proxy_pool();
        if pool.is_empty() {
            return Selection::Direct;
        }

        let len = pool.len();
        let mut tried = vec![false; len];

        loop {
            let (index, cached) = {
                let mut state = self.state.lock();
                state.observe(&pool);

                let index = match state.next_untried(&tried) {
                    Some(index) => index,
                    None => break,
                };
                let cached = state.connectors.get(&index).cloned();
                if cached.is_some() {
                    state.cursor = (index + 1) % len;
                }
                (index, cached)
            };
            tried[index] = true;
            let entry = &pool[index];

            if !entry.has_url() {
                warn!("Skipping proxy #{} ({}): no url configured", index, entry.display_name());
                metrics::record_proxy_selection(entry.display_name(), metrics::PROXY_SKIPPED);
                continue;
            }

            let connector = match cached {
                Some(connector) => connector,
                None => match self.factory.connect(entry) {
                    Ok(connector) => {
                        let mut state = self.state.lock();
                        if state.is_current(&pool) {
                            state.connectors.insert(index, connector.clone());
                            state.cursor = (index + 1) % len;
                        }
                        connector
                    }
                    Err(e) => {
                        warn!("Proxy #{} ({}) unusable: {}", index, entry.display_name(), e);
                        metrics::record_proxy_selection(
                            entry.display_name(),
                            metrics::PROXY_FAILED,
                        );
                        continue;
                    }
                },
            };

            debug!(
                "Route: {} -> proxy #{} ({})",
                target_url,
                index,
                entry.display_name()
            );
            metrics::record_proxy_selection(entry.display_name(), metrics::PROXY_SELECTED);

            return Selection::Selected {
                connector,
                entry: entry.clone(),
                index,
            };
        }

        error!(
            "No usable proxy for {}: all {} pool entries failed",
            target_url, len
        );
        metrics::record_pool_exhausted();
        Selection::Exhausted { attempted: len }
    }

    /// Index the next call will start from.
    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Pool source whose content tests can swap.
    struct TestPool(RwLock<Arc<Vec<ProxyEntry>>>);

    impl TestPool {
        fn new(urls: &[&str]) -> Arc<Self> {
            Arc::new(Self(RwLock::new(Arc::new(entries(urls)))))
        }

        fn set(&self, urls: &[&str]) {
            *self.0.write() = Arc::new(entries(urls));
        }
    }

    impl PoolSource for TestPool {
        fn proxy_pool(&self) -> Arc<Vec<ProxyEntry>> {
            Arc::clone(&self.0.read())
        }
    }

    fn entries(urls: &[&str]) -> Vec<ProxyEntry> {
        urls.iter().map(|url| ProxyEntry::new(*url)).collect()
    }

    /// Connector is the proxy url; urls containing "invalid" fail to build.
    #[derive(Default)]
    struct FakeFactory {
        builds: AtomicUsize,
    }

    impl ConnectorFactory for FakeFactory {
        type Connector = String;

        fn connect(&self, entry: &ProxyEntry) -> Result<String, ConnectorError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if entry.url.contains("invalid") {
                return Err(ConnectorError::UnsupportedScheme("invalid".to_string()));
            }
            Ok(entry.url.clone())
        }
    }

    fn router(pool: &Arc<TestPool>) -> ProxyRouter<FakeFactory> {
        ProxyRouter::new(pool.clone(), FakeFactory::default())
    }

    fn selected(selection: Selection<String>) -> String {
        match selection {
            Selection::Selected { connector, .. } => connector,
            other => panic!("expected a proxy, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_pool_is_direct() {
        let pool = TestPool::new(&[]);
        let router = router(&pool);
        assert!(matches!(router.select_connector("http://up/x"), Selection::Direct));
    }

    #[test]
    fn test_round_robin_wraps() {
        let pool = TestPool::new(&["http://a", "http://b", "http://c"]);
        let router = router(&pool);

        assert_eq!(selected(router.select_connector("t")), "http://a");
        assert_eq!(selected(router.select_connector("t")), "http://b");
        assert_eq!(selected(router.select_connector("t")), "http://c");
        assert_eq!(selected(router.select_connector("t")), "http://a");
    }

    #[test]
    fn test_failover_skips_invalid_entry_every_time() {
        let pool = TestPool::new(&["http://invalid", "http://b"]);
        let router = router(&pool);

        let first = router.select_connector("t");
        assert_eq!(first.entry().map(|e| e.url.as_str()), Some("http://b"));
        assert_eq!(router.cursor(), 0);

        // Next call starts after B, wraps to the invalid entry, then B again
        assert_eq!(selected(router.select_connector("t")), "http://b");
        assert_eq!(router.factory.builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_blank_url_is_skipped() {
        let pool = TestPool::new(&["   ", "http://b"]);
        let router = router(&pool);
        assert_eq!(selected(router.select_connector("t")), "http://b");
        // The blank entry never reaches the factory
        assert_eq!(router.factory.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_change_resets_cursor() {
        let pool = TestPool::new(&["http://a", "http://b"]);
        let router = router(&pool);

        assert_eq!(selected(router.select_connector("t")), "http://a");
        assert_eq!(router.cursor(), 1);

        pool.set(&["http://b", "http://c"]);
        assert_eq!(selected(router.select_connector("t")), "http://b");
        assert_eq!(router.cursor(), 1);
    }

    #[test]
    fn test_equal_pool_content_keeps_cursor() {
        let pool = TestPool::new(&["http://a", "http://b"]);
        let router = router(&pool);

        assert_eq!(selected(router.select_connector("t")), "http://a");
        // Same content behind a new allocation is not a change
        pool.set(&["http://a", "http://b"]);
        assert_eq!(selected(router.select_connector("t")), "http://b");
    }

    #[test]
    fn test_reorder_counts_as_change() {
        let pool = TestPool::new(&["http://a", "http://b"]);
        let router = router(&pool);

        assert_eq!(selected(router.select_connector("t")), "http://a");
        pool.set(&["http://b", "http://a"]);
        assert_eq!(selected(router.select_connector("t")), "http://b");
    }

    #[test]
    fn test_shrinking_pool_keeps_index_in_bounds() {
        let pool = TestPool::new(&["http://a", "http://b", "http://c"]);
        let router = router(&pool);
        router.select_connector("t");
        router.select_connector("t");
        assert_eq!(router.cursor(), 2);

        pool.set(&["http://z"]);
        assert_eq!(selected(router.select_connector("t")), "http://z");
        assert_eq!(router.cursor(), 0);
    }

    #[test]
    fn test_exhausted_pool() {
        let pool = TestPool::new(&["http://invalid-1", "", "http://invalid-2"]);
        let router = router(&pool);

        let selection = router.select_connector("t");
        assert!(selection.is_exhausted());
        assert!(matches!(selection, Selection::Exhausted { attempted: 3 }));
        assert_eq!(router.cursor(), 0);
    }

    #[test]
    fn test_connectors_are_cached_until_pool_changes() {
        let pool = TestPool::new(&["http://a", "http://b"]);
        let router = router(&pool);

        for _ in 0..6 {
            router.select_connector("t");
        }
        assert_eq!(router.factory.builds.load(Ordering::SeqCst), 2);

        pool.set(&["http://a"]);
        router.select_connector("t");
        assert_eq!(router.factory.builds.load(Ordering::SeqCst), 3);
    }

    /// Blocks inside `connect` until the test releases it.
    struct GatedFactory {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ConnectorFactory for GatedFactory {
        type Connector = String;

        fn connect(&self, entry: &ProxyEntry) -> Result<String, ConnectorError> {
            self.entered.lock().send(()).ok();
            self.release.lock().recv().ok();
            Ok(entry.url.clone())
        }
    }

    type Gated = (
        Arc<ProxyRouter<GatedFactory>>,
        mpsc::Receiver<()>,
        mpsc::Sender<()>,
    );

    fn gated_router(pool: &Arc<TestPool>) -> Gated {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let factory = GatedFactory {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let router = Arc::new(ProxyRouter::new(pool.clone(), factory));
        (router, entered_rx, release_tx)
    }

    #[test]
    fn test_connector_built_without_holding_lock() {
        let pool = TestPool::new(&["http://slow"]);
        let (router, entered, release) = gated_router(&pool);

        let worker = {
            let router = Arc::clone(&router);
            std::thread::spawn(move || router.select_connector("t"))
        };

        entered.recv().unwrap();
        assert!(router.state.try_lock().is_some());

        release.send(()).unwrap();
        let selection = worker.join().unwrap();
        assert_eq!(selection.entry().map(|e| e.url.as_str()), Some("http://slow"));
        assert_eq!(router.cursor(), 0);
        assert!(router.state.lock().connectors.contains_key(&0));
    }

    #[test]
    fn test_pool_change_during_build_is_not_cached() {
        let pool = TestPool::new(&["http://old", "http://other"]);
        let (router, entered, release) = gated_router(&pool);

        let worker = {
            let router = Arc::clone(&router);
            std::thread::spawn(move || router.select_connector("t"))
        };

        entered.recv().unwrap();
        pool.set(&["http://new", "http://other"]);
        // Another caller observes the new pool while the build is in flight
        router.state.lock().observe(&pool.proxy_pool());

        release.send(()).unwrap();
        let selection = worker.join().unwrap();
        assert_eq!(selection.entry().map(|e| e.url.as_str()), Some("http://old"));
        assert!(router.state.lock().connectors.is_empty());
        assert_eq!(router.cursor(), 0);
    }

    #[test]
    fn test_concurrent_selection_stays_in_bounds() {
        let pool = TestPool::new(&["http://a", "http://b", "http://c"]);
        let router = Arc::new(router(&pool));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let router = Arc::clone(&router);
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for n in 0..200 {
                        if i == 0 && n % 50 == 0 {
                            let urls: &[&str] = if n % 100 == 0 {
                                &["http://a"]
                            } else {
                                &["http://a", "http://b", "http://c"]
                            };
                            pool.set(urls);
                        }
                        let selection = router.select_connector("t");
                        assert!(matches!(selection, Selection::Selected { .. }));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(router.cursor() < pool.proxy_pool().len());
    }
}
