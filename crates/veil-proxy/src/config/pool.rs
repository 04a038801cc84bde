//! Proxy pool file loading.
//!
//! Accepted shapes: `{"proxies": [..]}` or a bare array. Each entry is either
//! an object `{"url": "http://host:port", "name": "optional"}` or a plain URL
//! string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyPoolConfig {
    /// JSON pool file; requests go direct when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// One network intermediary in the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyEntry {
    /// Proxy URL; blank entries are kept so the router can report them
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ProxyEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }

    pub fn named(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: Some(name.into()),
        }
    }

    /// Name for logs and metrics: the configured name, else the URL.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.url,
        }
    }

    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum PoolFileError {
    #[error("failed to read proxy pool file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("proxy pool file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("proxy pool must be an array or an object with a `proxies` array")]
    NotAnArray,
}

/// Parse a pool document that has already been decoded as JSON.
pub fn parse_pool(document: &Value) -> Result<Vec<ProxyEntry>, PoolFileError> {
    let entries = match document {
        Value::Array(entries) => entries,
        Value::Object(map) => map
            .get("proxies")
            .and_then(Value::as_array)
            .ok_or(PoolFileError::NotAnArray)?,
        _ => return Err(PoolFileError::NotAnArray),
    };

    let mut pool = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match entry {
            Value::String(url) => pool.push(ProxyEntry::new(url.clone())),
            Value::Object(_) => match ProxyEntry::deserialize(entry) {
                Ok(parsed) => pool.push(parsed),
                Err(e) => warn!("Skipping proxy #{}: {}", index, e),
            },
            other => warn!("Skipping proxy #{}: unexpected value {}", index, other),
        }
    }

    Ok(pool)
}

pub fn read_pool_file(path: &Path) -> Result<Vec<ProxyEntry>, PoolFileError> {
    let contents = std::fs::read_to_string(path).map_err(|source| PoolFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value =
        serde_json::from_str(&contents).map_err(|source| PoolFileError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    parse_pool(&document)
}

/// Load the pool for the running proxy, degrading to an empty pool on any error.
pub fn load_pool(path: Option<&Path>) -> Vec<ProxyEntry> {
    let Some(path) = path else {
        info!("No proxy pool configured, connecting directly");
        return Vec::new();
    };

    match read_pool_file(path) {
        Ok(pool) => {
            info!("Loaded {} proxies from {}", pool.len(), path.display());
            pool
        }
        Err(e) => {
            warn!("{}; connecting directly", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_parse_object_form() {
        let pool = parse_pool(&json!({
            "proxies": [
                {"url": "http://10.0.0.1:3128", "name": "dc-1"},
                {"url": "http://10.0.0.2:3128"}
            ]
        }))
        .unwrap();

        assert_eq!(
            pool,
            vec![
                ProxyEntry::named("http://10.0.0.1:3128", "dc-1"),
                ProxyEntry::new("http://10.0.0.2:3128"),
            ]
        );
    }

    #[test]
    fn test_parse_bare_array_with_strings() {
        let pool = parse_pool(&json!(["http://a:1", {"url": "http://b:2"}])).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].url, "http://a:1");
    }

    #[test]
    fn test_missing_url_kept_as_blank() {
        let pool = parse_pool(&json!([{"name": "broken"}])).unwrap();
        assert_eq!(pool.len(), 1);
        assert!(!pool[0].has_url());
        assert_eq!(pool[0].display_name(), "broken");
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let pool = parse_pool(&json!([42, null, {"url": 7}, "http://ok:1"])).unwrap();
        assert_eq!(pool, vec![ProxyEntry::new("http://ok:1")]);
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(
            parse_pool(&json!({"proxies": "http://a:1"})),
            Err(PoolFileError::NotAnArray)
        ));
        assert!(matches!(
            parse_pool(&json!("http://a:1")),
            Err(PoolFileError::NotAnArray)
        ));
    }

    #[test]
    fn test_display_name_falls_back_to_url() {
        assert_eq!(ProxyEntry::new("http://a:1").display_name(), "http://a:1");
        assert_eq!(ProxyEntry::named("http://a:1", "  ").display_name(), "http://a:1");
    }

    #[test]
    fn test_read_pool_file_and_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"proxies": [{{"url": "http://p:8080"}}]}}"#).unwrap();
        assert_eq!(read_pool_file(file.path()).unwrap().len(), 1);

        assert!(load_pool(None).is_empty());
        assert!(load_pool(Some(Path::new("/nonexistent/veil-pool.json"))).is_empty());
    }
}
