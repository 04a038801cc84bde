//! Auth-failure analytics.
//!
//! Upstream 401 responses are recorded as [`AuthFailureEvent`]s. The
//! in-memory [`AuthFailureLog`] groups them into fixed time buckets keyed by
//! endpoint, method and model, and keeps only the most recent buckets.

use crate::config::AnalyticsConfig;
use crate::metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthFailureEvent {
    pub timestamp: DateTime<Utc>,
    /// Client-facing path, before obfuscation
    pub endpoint: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AuthFailureEvent {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        Self::at(Utc::now(), endpoint, method, model)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            timestamp,
            endpoint: endpoint.into(),
            method: method.into(),
            model,
        }
    }
}

/// Pull the top-level `model` string out of a JSON request body.
pub fn model_from_body(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("model")?.as_str().map(str::to_string)
}

/// Receives auth-failure events.
pub trait AuthFailureSink: Send + Sync {
    fn record(&self, event: AuthFailureEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FailureKey {
    endpoint: String,
    method: String,
    model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCount {
    pub endpoint: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketSummary {
    pub start: DateTime<Utc>,
    pub total: u64,
    /// Highest count first
    pub failures: Vec<FailureCount>,
}

/// Time-bucketed auth-failure counts.
pub struct AuthFailureLog {
    bucket_secs: i64,
    max_buckets: usize,
    buckets: Mutex<BTreeMap<i64, HashMap<FailureKey, u64>>>,
}

impl AuthFailureLog {
    pub fn new(bucket_secs: u64, max_buckets: usize) -> Self {
        Self {
            bucket_secs: i64::try_from(bucket_secs.max(1)).unwrap_or(i64::MAX),
            max_buckets: max_buckets.max(1),
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Build the log from config, or `None` when analytics are disabled.
    pub fn from_config(config: &AnalyticsConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.bucket_secs, config.max_buckets))
    }

    fn bucket_start(&self, timestamp: &DateTime<Utc>) -> i64 {
        timestamp.timestamp().div_euclid(self.bucket_secs) * self.bucket_secs
    }

    /// Bucket summaries, oldest first.
    pub fn snapshot(&self) -> Vec<BucketSummary> {
        let buckets = self.buckets.lock();
        buckets
            .iter()
            .map(|(start, counts)| {
                let mut failures: Vec<FailureCount> = counts
                    .iter()
                    .map(|(key, count)| FailureCount {
                        endpoint: key.endpoint.clone(),
                        method: key.method.clone(),
                        model: key.model.clone(),
                        count: *count,
                    })
                    .collect();
                failures.sort_by(|a, b| {
                    b.count
                        .cmp(&a.count)
                        .then_with(|| a.endpoint.cmp(&b.endpoint))
                        .then_with(|| a.method.cmp(&b.method))
                        .then_with(|| a.model.cmp(&b.model))
                });

                BucketSummary {
                    start: DateTime::from_timestamp(*start, 0).unwrap_or_default(),
                    total: counts.values().sum(),
                    failures,
                }
            })
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.buckets
            .lock()
            .values()
            .flat_map(|counts| counts.values())
            .sum()
    }
}

impl AuthFailureSink for AuthFailureLog {
    fn record(&self, event: AuthFailureEvent) {
        warn!(
            "Upstream rejected credentials: {} {} (model: {})",
            event.method,
            event.endpoint,
            event.model.as_deref().unwrap_or("-")
        );
        metrics::record_auth_failure(&event.method);

        let start = self.bucket_start(&event.timestamp);
        let key = FailureKey {
            endpoint: event.endpoint,
            method: event.method,
            model: event.model,
        };

        let mut buckets = self.buckets.lock();
        *buckets.entry(start).or_default().entry(key).or_insert(0) += 1;
        while buckets.len() > self.max_buckets {
            buckets.pop_first();
        }
    }
}
