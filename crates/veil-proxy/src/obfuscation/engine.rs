//! Literal substitution over strings, raw bytes and JSON value trees.
//!
//! Every dictionary entry is applied in order, each to the output of the
//! previous one, so substitutions chain: with `a -> b` followed by `b -> c`,
//! the text `a` becomes `c`. Within one entry replacement is leftmost and
//! non-overlapping.

use super::dictionary::Dictionary;
use serde_json::Value;
use std::borrow::Cow;

/// Result of rewriting a value tree in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// The dictionary was empty; the tree was not visited.
    Disabled,
    /// The tree was traversed; `rewritten` string nodes changed.
    Applied { rewritten: usize },
}

impl RewriteOutcome {
    pub fn rewritten(&self) -> usize {
        match self {
            RewriteOutcome::Disabled => 0,
            RewriteOutcome::Applied { rewritten } => *rewritten,
        }
    }
}

/// Apply every entry of `dict` to `text`. Borrows when nothing matched.
pub fn apply_str<'a>(text: &'a str, dict: &Dictionary) -> Cow<'a, str> {
    let mut current = Cow::Borrowed(text);
    if text.is_empty() {
        return current;
    }

    for sub in dict.substitutions() {
        let haystack: &str = &current;
        if !sub.matcher.is_match(haystack) {
            continue;
        }
        let replaced = sub
            .matcher
            .replace_all(haystack, &[sub.replacement.as_str()]);
        current = Cow::Owned(replaced);
    }

    current
}

/// Byte-level counterpart of [`apply_str`].
///
/// Patterns are valid UTF-8, so matching on raw bytes gives the same result
/// as matching on decoded text and never splits a multi-byte character.
pub fn apply_bytes<'a>(bytes: &'a [u8], dict: &Dictionary) -> Cow<'a, [u8]> {
    let mut current = Cow::Borrowed(bytes);
    if bytes.is_empty() {
        return current;
    }

    for sub in dict.substitutions() {
        let haystack: &[u8] = &current;
        if !sub.matcher.is_match(haystack) {
            continue;
        }
        let replaced = sub
            .matcher
            .replace_all_bytes(haystack, &[sub.replacement.as_bytes()]);
        current = Cow::Owned(replaced);
    }

    current
}

/// Rewrite every string node of `value` in place.
///
/// Object keys are left alone; array and object order is preserved. With an
/// empty dictionary the tree is not visited at all.
pub fn rewrite_tree(value: &mut Value, dict: &Dictionary) -> RewriteOutcome {
    if dict.is_empty() {
        return RewriteOutcome::Disabled;
    }
    RewriteOutcome::Applied {
        rewritten: rewrite_node(value, dict),
    }
}

/// Owning form of [`rewrite_tree`].
pub fn apply_tree(mut value: Value, dict: &Dictionary) -> Value {
    rewrite_tree(&mut value, dict);
    value
}

fn rewrite_node(value: &mut Value, dict: &Dictionary) -> usize {
    match value {
        Value::String(text) => {
            let replaced = match apply_str(text, dict) {
                Cow::Owned(replaced) => Some(replaced),
                Cow::Borrowed(_) => None,
            };
            match replaced {
                Some(replaced) => {
                    *text = replaced;
                    1
                }
                None => 0,
            }
        }
        Value::Array(items) => items.iter_mut().map(|item| rewrite_node(item, dict)).sum(),
        Value::Object(map) => map.values_mut().map(|item| rewrite_node(item, dict)).sum(),
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}
