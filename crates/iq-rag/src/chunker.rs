use iq_core::Chunk;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Word-window sizes for [`chunk_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub window_words: usize,
    pub overlap_words: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window_words: 600,
            overlap_words: 60,
        }
    }
}

impl ChunkerConfig {
    /// Words between the starts of consecutive windows; never zero.
    pub fn stride(&self) -> usize {
        self.window_words.saturating_sub(self.overlap_words).max(1)
    }
}

/// Splits `text` into overlapping word windows.
///
/// Whitespace runs collapse to single spaces. Returns an empty vec for blank
/// input; callers decide whether that is an error. Output is a pure function
/// of `(text, filename, config)`, so re-chunking yields the same ids.
pub fn chunk_text(text: &str, filename: &str, config: ChunkerConfig) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        warn!(filename, "empty text passed to chunker");
        return Vec::new();
    }

    let window = config.window_words.max(1);
    let stride = config.stride();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < words.len() {
        let end = (start + window).min(words.len());
        let slice = &words[start..end];
        let chunk_index = chunks.len();
        chunks.push(Chunk {
            chunk_id: Chunk::make_id(filename, chunk_index),
            filename: filename.to_string(),
            chunk_index,
            text: slice.join(" "),
            word_count: slice.len(),
        });
        if end == words.len() {
            break;
        }
        start += stride;
    }

    info!(
        filename,
        chunks = chunks.len(),
        total_words = words.len(),
        window,
        "chunked document"
    );
    chunks
}
