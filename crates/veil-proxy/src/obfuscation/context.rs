//! Shared transform state and body-level rewrite operations.

use super::compiler::{compile, Dictionaries, Rule};
use super::dictionary::Dictionary;
use super::engine::{apply_tree, rewrite_tree};
use super::streaming::SseRewriter;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to a request or response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRewrite {
    /// The dictionary for this direction is empty; the body was not parsed.
    Disabled(Bytes),
    /// The body is not a JSON document and was passed through.
    NotJson(Bytes),
    /// The body parsed but no string matched.
    Unchanged(Bytes),
    /// At least one string node was rewritten.
    Rewritten { body: Bytes, strings: usize },
}

impl BodyRewrite {
    pub fn into_bytes(self) -> Bytes {
        match self {
            BodyRewrite::Disabled(body)
            | BodyRewrite::NotJson(body)
            | BodyRewrite::Unchanged(body)
            | BodyRewrite::Rewritten { body, .. } => body,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, BodyRewrite::Rewritten { .. })
    }

    /// Number of rewritten string nodes (zero unless `Rewritten`).
    pub fn strings_rewritten(&self) -> usize {
        match self {
            BodyRewrite::Rewritten { strings, .. } => *strings,
            _ => 0,
        }
    }
}

fn rewrite_body(body: Bytes, dict: &Dictionary) -> BodyRewrite {
    if dict.is_empty() {
        return BodyRewrite::Disabled(body);
    }

    let mut value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return BodyRewrite::NotJson(body),
    };

    // Numbers keep their source literal through re-encoding (arbitrary_precision)
    let strings = rewrite_tree(&mut value, dict).rewritten();
    if strings == 0 {
        return BodyRewrite::Unchanged(body);
    }

    match serde_json::to_vec(&value) {
        Ok(encoded) => BodyRewrite::Rewritten {
            body: Bytes::from(encoded),
            strings,
        },
        Err(e) => {
            warn!("Failed to re-encode rewritten body, passing it through: {}", e);
            BodyRewrite::Unchanged(body)
        }
    }
}

impl Dictionaries {
    /// Obfuscate a JSON request body with the forward dictionary.
    pub fn obfuscate_request_body(&self, body: Bytes) -> BodyRewrite {
        rewrite_body(body, &self.forward)
    }

    /// De-obfuscate a JSON response body with the reverse dictionary.
    pub fn deobfuscate_response_body(&self, body: Bytes) -> BodyRewrite {
        rewrite_body(body, &self.reverse)
    }

    pub fn obfuscate_value(&self, value: Value) -> Value {
        apply_tree(value, &self.forward)
    }

    pub fn deobfuscate_value(&self, value: Value) -> Value {
        apply_tree(value, &self.reverse)
    }

    /// A fresh per-connection rewriter for a streamed response.
    pub fn stream_rewriter(self: &Arc<Self>) -> SseRewriter {
        SseRewriter::new(Arc::clone(self))
    }
}

/// Owner of the current dictionary snapshot.
///
/// Readers take an `Arc` snapshot and keep using it for the whole request, so
/// a concurrent [`TransformContext::reload`] never exposes a half-built state.
pub struct TransformContext {
    current: RwLock<Arc<Dictionaries>>,
}

impl TransformContext {
    pub fn new(rules: &[Rule]) -> Self {
        Self {
            current: RwLock::new(Arc::new(compile(rules))),
        }
    }

    /// A context with obfuscation switched off.
    pub fn disabled() -> Self {
        Self {
            current: RwLock::new(Arc::new(Dictionaries::default())),
        }
    }

    /// Recompile from `rules` and swap the snapshot atomically.
    pub fn reload(&self, rules: &[Rule]) -> Arc<Dictionaries> {
        let compiled = Arc::new(compile(rules));
        *self.current.write() = Arc::clone(&compiled);
        info!(
            "Obfuscation dictionaries loaded: {} forward, {} reverse",
            compiled.forward.len(),
            compiled.reverse.len()
        );
        compiled
    }

    pub fn snapshot(&self) -> Arc<Dictionaries> {
        Arc::clone(&self.current.read())
    }

    pub fn obfuscate_request_body(&self, body: Bytes) -> BodyRewrite {
        self.snapshot().obfuscate_request_body(body)
    }

    pub fn deobfuscate_response_body(&self, body: Bytes) -> BodyRewrite {
        self.snapshot().deobfuscate_response_body(body)
    }

    pub fn stream_rewriter(&self) -> SseRewriter {
        self.snapshot().stream_rewriter()
    }
}

impl Default for TransformContext {
    fn default() -> Self {
        Self::disabled()
    }
}
