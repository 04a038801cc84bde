//! Ordered literal substitution dictionaries.
//!
//! A [`Dictionary`] is an immutable, ordered list of `pattern -> replacement`
//! pairs with one precompiled matcher per pattern. Dictionaries are built once
//! per configuration load through [`DictionaryBuilder`] and then only read.

use aho_corasick::AhoCorasick;
use tracing::warn;

/// One compiled dictionary entry.
#[derive(Debug, Clone)]
pub(crate) struct Substitution {
    pub(crate) pattern: String,
    pub(crate) replacement: String,
    pub(crate) matcher: AhoCorasick,
}

/// Ordered `pattern -> replacement` mapping with unique keys.
///
/// Iteration order is the order in which the entries are applied.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<Substitution>,
}

impl Dictionary {
    /// Build a dictionary directly from ordered pairs (later duplicates overwrite earlier ones).
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = DictionaryBuilder::default();
        for (key, value) in pairs {
            builder.insert(key.as_ref(), value.as_ref());
        }
        builder.build()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in application order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|entry| (entry.pattern.as_str(), entry.replacement.as_str()))
    }

    /// Look up the replacement for an exact key.
    pub fn get(&self, pattern: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.pattern == pattern)
            .map(|entry| entry.replacement.as_str())
    }

    pub(crate) fn substitutions(&self) -> &[Substitution] {
        &self.entries
    }
}

/// Accumulates pairs with overwrite semantics before compiling a [`Dictionary`].
///
/// Overwriting an existing key keeps the key's original position.
#[derive(Debug, Default)]
pub struct DictionaryBuilder {
    pairs: Vec<(String, String)>,
}

impl DictionaryBuilder {
    pub fn insert(&mut self, pattern: &str, replacement: &str) {
        match self.pairs.iter_mut().find(|(key, _)| key == pattern) {
            Some((_, existing)) => *existing = replacement.to_string(),
            None => self
                .pairs
                .push((pattern.to_string(), replacement.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Compile entries in insertion order.
    pub fn build(self) -> Dictionary {
        compile_pairs(self.pairs)
    }

    /// Compile entries in reverse insertion order.
    pub fn build_reversed(mut self) -> Dictionary {
        self.pairs.reverse();
        compile_pairs(self.pairs)
    }
}

fn compile_pairs(pairs: Vec<(String, String)>) -> Dictionary {
    let mut entries = Vec::with_capacity(pairs.len());

    for (pattern, replacement) in pairs {
        // An empty needle matches between every byte
        if pattern.is_empty() {
            warn!("Ignoring substitution with an empty pattern");
            continue;
        }

        match AhoCorasick::new([pattern.as_str()]) {
            Ok(matcher) => entries.push(Substitution {
                pattern,
                replacement,
                matcher,
            }),
            Err(e) => {
                warn!("Ignoring substitution for pattern '{}': {}", pattern, e);
            }
        }
    }

    Dictionary { entries }
}
