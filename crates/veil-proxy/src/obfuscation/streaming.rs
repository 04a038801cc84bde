//! Chunk-wise de-obfuscation of server-sent event streams.
//!
//! Each chunk is rewritten on its own with the JSON-escaped form of the reverse
//! dictionary, so a restored quote, backslash or newline stays escaped inside
//! the event's JSON data. There is no carry-over between chunks: a replacement
//! whose bytes are split across two chunks reaches the client unchanged.

use super::compiler::Dictionaries;
use super::engine::apply_bytes;
use crate::metrics;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Per-connection rewriter bound to one dictionary snapshot.
pub struct SseRewriter {
    dictionaries: Arc<Dictionaries>,
    chunks: u64,
    rewritten_chunks: u64,
}

impl SseRewriter {
    pub fn new(dictionaries: Arc<Dictionaries>) -> Self {
        Self {
            dictionaries,
            chunks: 0,
            rewritten_chunks: 0,
        }
    }

    /// Rewrite one chunk. Returns the input untouched when nothing matched.
    pub fn transform_chunk(&mut self, chunk: Bytes) -> Bytes {
        self.chunks += 1;

        let dict = &self.dictionaries.stream;
        if dict.is_empty() {
            return chunk;
        }

        let replaced = match apply_bytes(&chunk, dict) {
            Cow::Owned(bytes) => Some(bytes),
            Cow::Borrowed(_) => None,
        };

        match replaced {
            Some(bytes) => {
                self.rewritten_chunks += 1;
                metrics::record_substitutions(metrics::DIRECTION_STREAM, 1);
                Bytes::from(bytes)
            }
            None => chunk,
        }
    }

    pub fn chunks_seen(&self) -> u64 {
        self.chunks
    }

    pub fn chunks_rewritten(&self) -> u64 {
        self.rewritten_chunks
    }
}

impl Drop for SseRewriter {
    fn drop(&mut self) {
        if self.chunks > 0 {
            debug!(
                "Event stream closed after {} chunks ({} rewritten)",
                self.chunks, self.rewritten_chunks
            );
        }
    }
}

/// Lazily rewrite every successful chunk of `stream`, one output per input.
///
/// Errors pass through untouched. The rewriter lives as long as the returned
/// stream, so dropping the stream (client gone, upstream aborted) releases it.
pub fn rewrite_stream<S, E>(
    stream: S,
    mut rewriter: SseRewriter,
) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    stream.map(move |item| item.map(|chunk| rewriter.transform_chunk(chunk)))
}
