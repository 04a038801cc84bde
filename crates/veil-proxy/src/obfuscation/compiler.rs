//! Rule compilation into forward and reverse dictionaries.

use super::dictionary::{Dictionary, DictionaryBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A configured substitution directive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rule {
    /// Literal text to match in outbound content
    pub pattern: String,
    /// Literal text substituted in its place
    pub replacement: String,
    /// Whether the rule participates in outbound obfuscation (default: true)
    #[serde(default = "default_active")]
    pub active: bool,
    /// Whether the rule also participates in inbound de-obfuscation (default: false)
    #[serde(default)]
    pub reversible: bool,
}

fn default_active() -> bool {
    true
}

impl Rule {
    /// Active, one-way rule.
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            active: true,
            reversible: false,
        }
    }

    /// Active rule that is also undone on responses.
    pub fn reversible(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            reversible: true,
            ..Self::new(pattern, replacement)
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// The pair of dictionaries compiled from one rule list.
///
/// `forward` is applied to outbound request bodies, `reverse` to inbound
/// responses. The reverse dictionary runs in the opposite order of the rules
/// so that chained forward substitutions unwind correctly.
///
/// `stream` holds the reverse entries in their JSON-escaped form. Event
/// streams are rewritten as raw bytes, where a string's quotes, backslashes
/// and newlines appear escaped.
#[derive(Debug, Clone, Default)]
pub struct Dictionaries {
    pub forward: Dictionary,
    pub reverse: Dictionary,
    pub stream: Dictionary,
}

impl Dictionaries {
    /// True when neither direction has any entries.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.reverse.is_empty()
    }
}

/// Compile a rule list into forward and reverse dictionaries.
///
/// Rules are visited in order. For a duplicate pattern (or, in the reverse
/// dictionary, a duplicate replacement) the later rule wins.
pub fn compile(rules: &[Rule]) -> Dictionaries {
    let mut forward = DictionaryBuilder::default();
    let mut reverse = DictionaryBuilder::default();

    for rule in rules.iter().filter(|rule| rule.active) {
        if rule.pattern.is_empty() {
            warn!("Skipping obfuscation rule with an empty pattern");
            continue;
        }

        forward.insert(&rule.pattern, &rule.replacement);

        if rule.reversible {
            if rule.replacement.is_empty() {
                warn!(
                    "Rule for '{}' has an empty replacement and cannot be reversed",
                    rule.pattern
                );
                continue;
            }
            reverse.insert(&rule.replacement, &rule.pattern);
        }
    }

    debug!(
        "Compiled {} rules into {} forward / {} reverse substitutions",
        rules.len(),
        forward.len(),
        reverse.len()
    );

    let reverse = reverse.build_reversed();
    let stream = Dictionary::from_pairs(
        reverse
            .iter()
            .map(|(pattern, replacement)| (json_escaped(pattern), json_escaped(replacement))),
    );

    Dictionaries {
        forward: forward.build(),
        reverse,
        stream,
    }
}

/// `text` as it appears between the quotes of a JSON string.
fn json_escaped(text: &str) -> String {
    match serde_json::to_string(text) {
        Ok(quoted) => quoted[1..quoted.len() - 1].to_string(),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(dict: &Dictionary) -> Vec<(String, String)> {
        dict.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_rule_list() {
        let dicts = compile(&[]);
        assert!(dicts.is_empty());
    }

    #[test]
    fn test_inactive_rule_contributes_nothing() {
        let dicts = compile(&[Rule::reversible("secret", "public").inactive()]);
        assert!(dicts.forward.is_empty());
        assert!(dicts.reverse.is_empty());
    }

    #[test]
    fn test_one_way_rule_only_forward() {
        let dicts = compile(&[Rule::new("secret", "public")]);
        assert_eq!(dicts.forward.get("secret"), Some("public"));
        assert!(dicts.reverse.is_empty());
    }

    #[test]
    fn test_reversible_rule_both_directions() {
        let dicts = compile(&[Rule::reversible("secret", "public")]);
        assert_eq!(dicts.forward.get("secret"), Some("public"));
        assert_eq!(dicts.reverse.get("public"), Some("secret"));
    }

    #[test]
    fn test_duplicate_pattern_last_writer_wins() {
        let dicts = compile(&[Rule::new("a", "first"), Rule::new("a", "second")]);
        assert_eq!(dicts.forward.len(), 1);
        assert_eq!(dicts.forward.get("a"), Some("second"));
    }

    #[test]
    fn test_duplicate_reverse_key_last_writer_wins() {
        let dicts = compile(&[Rule::reversible("one", "x"), Rule::reversible("two", "x")]);
        assert_eq!(dicts.forward.len(), 2);
        assert_eq!(dicts.reverse.len(), 1);
        assert_eq!(dicts.reverse.get("x"), Some("two"));
    }

    #[test]
    fn test_forward_keeps_config_order_reverse_is_inverted() {
        let dicts = compile(&[Rule::reversible("x", "y"), Rule::reversible("y", "z")]);
        assert_eq!(
            pairs(&dicts.forward),
            vec![
                ("x".to_string(), "y".to_string()),
                ("y".to_string(), "z".to_string())
            ]
        );
        assert_eq!(
            pairs(&dicts.reverse),
            vec![
                ("z".to_string(), "y".to_string()),
                ("y".to_string(), "x".to_string())
            ]
        );
    }

    #[test]
    fn test_empty_pattern_and_empty_reverse_key_skipped() {
        let dicts = compile(&[Rule::reversible("", "x"), Rule::reversible("drop", "")]);
        assert_eq!(dicts.forward.len(), 1);
        assert_eq!(dicts.forward.get("drop"), Some(""));
        assert!(dicts.reverse.is_empty());
    }

    #[test]
    fn test_stream_dictionary_is_json_escaped() {
        let dicts = compile(&[
            Rule::reversible("say \"hi\"", "tok-1"),
            Rule::reversible("C:\\dir", "path-2"),
            Rule::reversible("line\nbreak", "tok-3"),
            Rule::reversible("plain", "tok-4"),
        ]);

        assert_eq!(dicts.stream.len(), 4);
        assert_eq!(dicts.stream.get("tok-1"), Some("say \\\"hi\\\""));
        assert_eq!(dicts.stream.get("path-2"), Some("C:\\\\dir"));
        assert_eq!(dicts.stream.get("tok-3"), Some("line\\nbreak"));
        assert_eq!(dicts.stream.get("tok-4"), Some("plain"));
        // Same order as the reverse dictionary
        let keys: Vec<&str> = dicts.stream.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["tok-4", "tok-3", "path-2", "tok-1"]);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let rules = vec![Rule::reversible("a", "b"), Rule::new("c", "d")];
        let first = compile(&rules);
        let second = compile(&rules);
        assert_eq!(pairs(&first.forward), pairs(&second.forward));
        assert_eq!(pairs(&first.reverse), pairs(&second.reverse));
    }

    #[test]
    fn test_rule_serde_defaults() {
        let rule: Rule =
            serde_json::from_str(r#"{"pattern": "a", "replacement": "b"}"#).unwrap();
        assert!(rule.active);
        assert!(!rule.reversible);
    }
}
