//! Obfuscation rule file loading.
//!
//! The rule file is JSON of the form `{"rules": [{"pattern": ..,
//! "replacement": .., "active": true, "reversible": false}, ..]}`. Any problem
//! with the file disables obfuscation instead of failing startup.

use crate::obfuscation::Rule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObfuscationConfig {
    /// JSON rule file; obfuscation is disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum RuleListError {
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rules file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("`rules` must be an array")]
    NotAnArray,
    #[error("rule #{index} is not an object")]
    NotAnObject { index: usize },
}

/// Parse a rule document that has already been decoded as JSON.
///
/// A missing or non-array `rules` field, or any entry that is not an object,
/// rejects the whole list. Object entries with a non-string or empty
/// `pattern`/`replacement` are skipped individually.
pub fn parse_rule_list(document: &Value) -> Result<Vec<Rule>, RuleListError> {
    let entries = document
        .get("rules")
        .and_then(Value::as_array)
        .ok_or(RuleListError::NotAnArray)?;

    if let Some(index) = entries.iter().position(|entry| !entry.is_object()) {
        return Err(RuleListError::NotAnObject { index });
    }

    let mut rules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match Rule::deserialize(entry) {
            Ok(rule) if rule.pattern.is_empty() => {
                warn!("Skipping rule #{}: empty pattern", index);
            }
            Ok(rule) => rules.push(rule),
            Err(e) => {
                warn!("Skipping rule #{}: {}", index, e);
            }
        }
    }

    Ok(rules)
}

/// Read and parse a rule file.
pub fn read_rules_file(path: &Path) -> Result<Vec<Rule>, RuleListError> {
    let contents = std::fs::read_to_string(path).map_err(|source| RuleListError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value =
        serde_json::from_str(&contents).map_err(|source| RuleListError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    parse_rule_list(&document)
}

/// Load rules for the running proxy, degrading to an empty list on any error.
pub fn load_rules(path: Option<&Path>) -> Vec<Rule> {
    let Some(path) = path else {
        info!("No rules file configured, obfuscation disabled");
        return Vec::new();
    };

    match read_rules_file(path) {
        Ok(rules) => {
            info!("Loaded {} obfuscation rules from {}", rules.len(), path.display());
            rules
        }
        Err(e) => {
            warn!("{}; obfuscation disabled", e);
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
    fn test_parse_full_rule_list() {
        let rules = parse_rule_list(&json!({
            "rules": [
                {"pattern": "a", "replacement": "b"},
                {"pattern": "c", "replacement": "d", "active": false},
                {"pattern": "e", "replacement": "f", "reversible": true}
            ]
        }))
        .unwrap();

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0], Rule::new("a", "b"));
        assert_eq!(rules[1], Rule::new("c", "d").inactive());
        assert_eq!(rules[2], Rule::reversible("e", "f"));
    }

    #[test]
    fn test_missing_rules_field() {
        assert!(matches!(
            parse_rule_list(&json!({"other": []})),
            Err(RuleListError::NotAnArray)
        ));
    }

    #[test]
    fn test_non_array_rules() {
        assert!(matches!(
            parse_rule_list(&json!({"rules": {"pattern": "a"}})),
            Err(RuleListError::NotAnArray)
        ));
    }

    #[test]
    fn test_non_object_entry_rejects_list() {
        assert!(matches!(
            parse_rule_list(&json!({"rules": [{"pattern": "a", "replacement": "b"}, "oops"]})),
            Err(RuleListError::NotAnObject { index: 1 })
        ));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let rules = parse_rule_list(&json!({
            "rules": [
                {"pattern": 5, "replacement": "b"},
                {"replacement": "b"},
                {"pattern": "", "replacement": "b"},
                {"pattern": "ok", "replacement": "fine"}
            ]
        }))
        .unwrap();
        assert_eq!(rules, vec![Rule::new("ok", "fine")]);
    }

    #[test]
    fn test_read_rules_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rules": [{{"pattern": "x", "replacement": "y", "reversible": true}}]}}"#
        )
        .unwrap();

        let rules = read_rules_file(file.path()).unwrap();
        assert_eq!(rules, vec![Rule::reversible("x", "y")]);
    }

    #[test]
    fn test_read_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "rules: [").unwrap();
        assert!(matches!(
            read_rules_file(file.path()),
            Err(RuleListError::Json { .. })
        ));
    }

    #[test]
    fn test_load_rules_degrades_to_empty() {
        assert!(load_rules(None).is_empty());
        assert!(load_rules(Some(Path::new("/nonexistent/veil-rules.json"))).is_empty());
    }
}
