//! Payload obfuscation.
//!
//! - `compiler` - rule list to forward/reverse dictionaries
//! - `dictionary` - ordered, precompiled substitution tables
//! - `engine` - substitution over strings, bytes and JSON trees
//! - `streaming` - per-chunk rewriting of event streams
//! - `context` - the shared, reloadable dictionary snapshot

mod compiler;
mod context;
mod dictionary;
mod engine;
mod streaming;

pub use compiler::{compile, Dictionaries, Rule};
pub use context::{BodyRewrite, TransformContext};
pub use dictionary::{Dictionary, DictionaryBuilder};
pub use engine::{apply_bytes, apply_str, apply_tree, rewrite_tree, RewriteOutcome};
pub use streaming::{rewrite_stream, SseRewriter};
