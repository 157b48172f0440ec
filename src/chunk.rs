//! Token-window text chunker.
//!
//! Splits document text into overlapping passages of at most
//! `window_tokens` tokens. Consecutive chunks share a configured overlap so
//! no idea is cut off mid-thought at a window edge, and each cut prefers a
//! nearby sentence boundary before falling back to a hard token cut.
//!
//! Chunk ids are a SHA-256 hash of `(document_id, ordinal, text)`, so
//! re-chunking unchanged content yields byte-identical ids. That property
//! is what makes re-ingestion idempotent: the index upserts by id and
//! identical content collapses onto the same entries.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// How far back from a hard cut we are willing to move to land on a
/// sentence boundary, as a fraction of the window.
const BOUNDARY_TOLERANCE_FRACTION: f64 = 0.125;

/// Split a document into overlapping token-window chunks.
///
/// `overlap_tokens` must be smaller than `window_tokens` (enforced at
/// config validation). Returns chunks with contiguous ordinals starting
/// at 0; whitespace-only text yields no chunks.
pub fn chunk_document(doc: &Document, window_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    let spans = token_spans(&doc.raw_text);
    if spans.is_empty() {
        return Vec::new();
    }

    let tolerance = boundary_tolerance(window_tokens, overlap_tokens);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal: i64 = 0;

    loop {
        let hard_end = (start + window_tokens).min(spans.len());
        let end = if hard_end < spans.len() {
            prefer_sentence_boundary(&doc.raw_text, &spans, start, hard_end, tolerance)
        } else {
            hard_end
        };

        let text = &doc.raw_text[spans[start].0..spans[end - 1].1];
        chunks.push(make_chunk(&doc.id, ordinal, text, end - start));
        ordinal += 1;

        if end >= spans.len() {
            break;
        }
        // Overlap is measured from the actual cut, not the hard window end,
        // so a boundary-shortened chunk still shares the configured tail.
        // The max() guarantees forward progress even with tiny windows.
        start = end.saturating_sub(overlap_tokens).max(start + 1);
    }

    chunks
}

/// Byte spans of whitespace-delimited tokens.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

fn boundary_tolerance(window_tokens: usize, overlap_tokens: usize) -> usize {
    let tolerance = (window_tokens as f64 * BOUNDARY_TOLERANCE_FRACTION) as usize;
    // The cut must always advance past the previous chunk's overlap region.
    tolerance.min(window_tokens.saturating_sub(overlap_tokens + 1))
}

/// Look back from the hard cut for a token that ends a sentence. Falls
/// back to the hard cut when no boundary lands within the tolerance.
fn prefer_sentence_boundary(
    text: &str,
    spans: &[(usize, usize)],
    start: usize,
    hard_end: usize,
    tolerance: usize,
) -> usize {
    let lookback_floor = hard_end.saturating_sub(tolerance).max(start + 1);
    for end in (lookback_floor..=hard_end).rev() {
        let (_, token_end) = spans[end - 1];
        let tail = &text[..token_end];
        if tail.ends_with('.') || tail.ends_with('!') || tail.ends_with('?') {
            return end;
        }
    }
    hard_end
}

fn make_chunk(document_id: &str, ordinal: i64, text: &str, token_count: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    let id = format!("{:x}", hasher.finalize());

    Chunk {
        id,
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        token_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document {
            id: "doc1".to_string(),
            source_uri: "file:///doc1.txt".to_string(),
            title: None,
            raw_text: text.to_string(),
        }
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_document(&doc(""), 512, 102).is_empty());
        assert!(chunk_document(&doc("   \n\t "), 512, 102).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document(&doc("hello adaptive world"), 512, 102);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].token_count, 3);
        assert_eq!(chunks[0].text, "hello adaptive world");
    }

    #[test]
    fn test_2000_tokens_window_512_overlap_02() {
        // 2000 tokens, window 512, overlap fraction 0.2 (102 tokens):
        // stride 410 gives starts 0, 410, 820, 1230, 1640.
        let chunks = chunk_document(&doc(&words(2000)), 512, 102);
        assert_eq!(chunks.len(), 5);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as i64);
            assert!(c.token_count <= 512, "chunk {} too large", i);
        }
        // Consecutive chunks share the 102-token overlap.
        for pair in chunks.windows(2) {
            let head: Vec<&str> = pair[1].text.split_whitespace().take(102).collect();
            let tail: Vec<&str> = pair[0]
                .text
                .split_whitespace()
                .rev()
                .take(102)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert_eq!(head, tail);
        }
    }

    #[test]
    fn test_prefers_sentence_boundary_within_tolerance() {
        // A period 10 tokens before the hard cut: the cut should move back
        // to it instead of splitting the following sentence.
        let mut tokens: Vec<String> = (0..100).map(|i| format!("w{}", i)).collect();
        tokens[89] = "w89.".to_string();
        let text = tokens.join(" ");
        let chunks = chunk_document(&doc(&text), 96, 10);
        assert!(chunks[0].text.ends_with("w89."));
        assert_eq!(chunks[0].token_count, 90);
    }

    #[test]
    fn test_hard_cut_when_no_boundary_nearby() {
        let chunks = chunk_document(&doc(&words(100)), 96, 10);
        assert_eq!(chunks[0].token_count, 96);
    }

    #[test]
    fn test_ids_deterministic_and_content_addressed() {
        let a = chunk_document(&doc(&words(1000)), 512, 102);
        let b = chunk_document(&doc(&words(1000)), 512, 102);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.id, y.id);
        }
        // Different text at the same ordinal yields a different id.
        let c = chunk_document(&doc(&words(999)), 512, 102);
        assert_ne!(a.last().unwrap().id, c.last().unwrap().id);
    }

    #[test]
    fn test_preserves_original_whitespace_inside_chunk() {
        let chunks = chunk_document(&doc("alpha  beta\n\ngamma"), 512, 0);
        assert_eq!(chunks[0].text, "alpha  beta\n\ngamma");
    }
}
