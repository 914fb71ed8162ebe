//! Overlapping chunking of fetched page text.
//!
//! Tokens are approximated by whitespace-separated words.

pub const MAX_CHUNKS: usize = 8;
pub const CHUNK_TOKENS: usize = 900;
pub const CHUNK_OVERLAP_TOKENS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_chunks: usize,
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chunks: MAX_CHUNKS,
            chunk_tokens: CHUNK_TOKENS,
            overlap_tokens: CHUNK_OVERLAP_TOKENS,
        }
    }
}

/// Split `text` into at most `max_chunks` windows of `chunk_tokens` words,
/// consecutive windows sharing `overlap_tokens` words.
pub fn chunk_text(text: &str, options: ChunkOptions) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() || options.max_chunks == 0 {
        return Vec::new();
    }

    let size = options.chunk_tokens.max(1);
    let step = size.saturating_sub(options.overlap_tokens).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() && chunks.len() < options.max_chunks {
        let end = (start + size).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("  hello   world ", ChunkOptions::default());
        assert_eq!(chunks, vec!["hello world".to_string()]);
        assert!(chunk_text("   ", ChunkOptions::default()).is_empty());
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunks = chunk_text(&words(2000), ChunkOptions::default());
        assert_eq!(chunks.len(), 3);

        let first: Vec<&str> = chunks[0].split(' ').collect();
        let second: Vec<&str> = chunks[1].split(' ').collect();
        assert_eq!(first.len(), CHUNK_TOKENS);
        assert_eq!(second[0], "w780");
        assert_eq!(&first[780..], &second[..CHUNK_OVERLAP_TOKENS]);
        assert!(chunks[2].ends_with("w1999"));
    }

    #[test]
    fn chunk_count_is_capped() {
        let chunks = chunk_text(&words(20_000), ChunkOptions::default());
        assert_eq!(chunks.len(), MAX_CHUNKS);
    }
}
