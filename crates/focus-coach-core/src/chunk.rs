//! Line-boundary text chunker.
//!
//! Every non-blank line of a document becomes one [`DocumentChunk`]. There is
//! no overlap and no attempt at semantic boundaries: the knowledge base is a
//! list of short, one-line strategies, and one line is one retrievable unit.
//!
//! Chunk ids are deterministic (`<source>_chunk_<index>`), so re-running the
//! chunker over the same file always yields the same ids. Each chunk also
//! carries a SHA-256 hash of its text.
//!
//! # Example
//!
//! ```rust
//! use focus_coach_core::chunk::chunk_lines;
//!
//! let chunks = chunk_lines("tips.txt", "Take a 5-minute break\n\nWrite down your top 3 tasks\n");
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].id, "tips.txt_chunk_0");
//! assert_eq!(chunks[1].text, "Write down your top 3 tasks");
//! ```

use sha2::{Digest, Sha256};

use crate::models::DocumentChunk;

/// Deterministic chunk id for the `index`-th chunk of `source`.
pub fn chunk_id(source: &str, index: usize) -> String {
    format!("{}_chunk_{}", source, index)
}

/// Split `text` into one chunk per non-blank line.
///
/// Indices are contiguous from 0 over the kept lines. Both `\n` and `\r\n`
/// line endings are accepted; line content is otherwise kept verbatim.
pub fn chunk_lines(source: &str, text: &str) -> Vec<DocumentChunk> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| make_chunk(source, i, line))
        .collect()
}

fn make_chunk(source: &str, index: usize, text: &str) -> DocumentChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        id: chunk_id(source, index),
        source: source.to_string(),
        chunk_index: index as i64,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_lines_dropped() {
        let text = "Take a 5-minute break\n\nWrite down your top 3 tasks\n";
        let chunks = chunk_lines("focus.txt", text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Take a 5-minute break");
        assert_eq!(chunks[1].text, "Write down your top 3 tasks");
        assert_eq!(chunks[0].id, "focus.txt_chunk_0");
        assert_eq!(chunks[1].id, "focus.txt_chunk_1");
    }

    #[test]
    fn test_whitespace_only_lines_dropped() {
        let chunks = chunk_lines("f.txt", "a\n\nb\n   \nc");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.source, "f.txt");
        }
    }

    #[test]
    fn test_crlf_line_endings() {
        let chunks = chunk_lines("w.txt", "one\r\n\r\ntwo\r\n");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_lines("e.txt", "").is_empty());
        assert!(chunk_lines("e.txt", "\n \n\t\n").is_empty());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\nBeta\n\nGamma";
        let c1 = chunk_lines("d.txt", text);
        let c2 = chunk_lines("d.txt", text);
        assert_eq!(c1, c2);
        assert_ne!(c1[0].hash, c1[1].hash);
    }
}
