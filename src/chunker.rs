//! Sentence-aligned overlapping text chunker.
//!
//! Splits extracted document text into chunks sized by an approximate token
//! budget (`chunk_size_tokens * chars_per_token` characters). Proposed
//! boundaries are snapped to the nearest sentence terminator within a
//! symmetric search window so chunks end on sentence or paragraph breaks
//! where the text allows it; otherwise the split is a hard character cut.
//!
//! Offsets are character offsets into the trimmed input, so multi-byte text
//! can never be split inside a scalar value.

use crate::config::ChunkingConfig;
use crate::models::ChunkDraft;

/// Split `text` into ordered chunk drafts.
///
/// Returns an empty list for blank input. Indices are dense, zero-based, and
/// strictly increasing in emission order. A chunk shorter than
/// `min_chunk_tokens` is only emitted when it is the trailing remainder of
/// the text.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<ChunkDraft> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let len = chars.len();
    let estimated_chars = config.chunk_size_tokens * config.chars_per_token;
    let overlap_chars = config.overlap_tokens * config.chars_per_token;

    let mut drafts = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    tracing::debug!(chars = len, "chunking text");

    while start < len {
        let mut end = (start + estimated_chars).min(len);

        // Not the last chunk: snap to the nearest sentence end in a
        // symmetric window around the proposed boundary.
        if end < len {
            if let Some(snapped) = find_sentence_end(&chars, end, estimated_chars / 2) {
                if snapped > start {
                    end = snapped;
                }
            }
        }

        let content: String = chars[start..end].iter().collect();
        let content = content.trim().to_string();

        let estimated_tokens = content.chars().count() / config.chars_per_token;
        if !content.is_empty() && (estimated_tokens >= config.min_chunk_tokens || end >= len) {
            drafts.push(ChunkDraft {
                content,
                chunk_index,
                start_char: start,
                end_char: end,
            });
            chunk_index += 1;
        }

        // Advance with overlap, never re-covering past the previous end.
        let next = (start + estimated_chars).saturating_sub(overlap_chars).max(end);
        if next <= start {
            break;
        }
        start = next;
    }

    tracing::debug!(chunks = drafts.len(), "chunking finished");
    drafts
}

/// Find the sentence end closest to `target`, searching `window` characters
/// on either side. A sentence end is a `.`, `!` or `?` followed by
/// whitespace, or a blank-line paragraph break; the boundary sits after the
/// trailing whitespace run. Returns `None` when the window holds no
/// terminator.
fn find_sentence_end(chars: &[char], target: usize, window: usize) -> Option<usize> {
    let lo = target.saturating_sub(window);
    let hi = (target + window).min(chars.len());

    let mut best: Option<usize> = None;
    let mut best_distance = usize::MAX;

    let mut i = lo;
    while i < hi {
        let boundary = match chars[i] {
            '.' | '!' | '?' if i + 1 < chars.len() && chars[i + 1].is_whitespace() => {
                Some(end_of_whitespace(chars, i + 1, hi))
            }
            '\n' if i + 1 < chars.len() && chars[i + 1] == '\n' => {
                Some(end_of_whitespace(chars, i + 1, hi))
            }
            _ => None,
        };

        match boundary {
            Some(end) => {
                let distance = end.abs_diff(target);
                if distance < best_distance {
                    best_distance = distance;
                    best = Some(end);
                }
                i = end;
            }
            None => i += 1,
        }
    }

    best
}

fn end_of_whitespace(chars: &[char], mut i: usize, hi: usize) -> usize {
    while i < hi && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize, min: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size_tokens: size,
            overlap_tokens: overlap,
            min_chunk_tokens: min,
            chars_per_token: 4,
        }
    }

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {i} talks about deployment pipelines."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = "Short sentence.";
        let chunks = chunk_text(text, &config(700, 150, 400));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks[0].end_char, text.chars().count());
        assert_eq!(chunks[0].content, text);
    }

    #[test]
    fn test_blank_input_yields_empty_list() {
        assert!(chunk_text("", &config(700, 150, 400)).is_empty());
        assert!(chunk_text("   \n\t  ", &config(700, 150, 400)).is_empty());
    }

    #[test]
    fn test_indices_dense_and_offsets_ordered() {
        let text = sentences(400);
        let chunks = chunk_text(&text, &config(50, 10, 10));
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.start_char < c.end_char, "empty span at chunk {i}");
        }
        let last = chunks.last().unwrap();
        assert_eq!(last.end_char, text.trim().chars().count());
    }

    #[test]
    fn test_boundaries_snap_to_sentence_ends() {
        let text = sentences(100);
        let chars: Vec<char> = text.chars().collect();
        let chunks = chunk_text(&text, &config(50, 10, 10));
        for c in &chunks[..chunks.len() - 1] {
            // Every non-final boundary should sit right after a terminator's
            // whitespace, i.e. the previous non-space char ends a sentence.
            let before: Vec<char> = chars[..c.end_char]
                .iter()
                .rev()
                .skip_while(|ch| ch.is_whitespace())
                .take(1)
                .copied()
                .collect();
            assert_eq!(before, ['.'], "boundary at {} not on a sentence end", c.end_char);
        }
    }

    #[test]
    fn test_overlap_bounded() {
        let cfg = config(50, 10, 10);
        let overlap_chars = cfg.overlap_tokens * cfg.chars_per_token;
        let text = sentences(100);
        let chunks = chunk_text(&text, &cfg);
        for pair in chunks.windows(2) {
            let covered = pair[0].end_char.saturating_sub(pair[1].start_char);
            assert!(
                covered <= overlap_chars,
                "overlap {covered} exceeds budget {overlap_chars}"
            );
        }
    }

    #[test]
    fn test_no_delimiters_hard_split() {
        let text = "a".repeat(1000);
        let chunks = chunk_text(&text, &config(50, 10, 10));
        // 50 tokens * 4 chars = 200-char windows over 1000 chars.
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.end_char - c.start_char <= 200);
        }
        assert_eq!(chunks.last().unwrap().end_char, 1000);
    }

    #[test]
    fn test_trailing_remainder_kept_even_if_short() {
        let mut text = sentences(100);
        text.push_str(" End.");
        let chunks = chunk_text(&text, &config(50, 0, 40));
        let last = chunks.last().unwrap();
        assert_eq!(last.end_char, text.chars().count());
    }

    #[test]
    fn test_idempotent() {
        let text = sentences(120);
        let cfg = config(60, 15, 20);
        let a = chunk_text(&text, &cfg);
        let b = chunk_text(&text, &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn test_multibyte_text_never_panics() {
        let text = "Grüße aus München! Viele schöne Wörter über längere Sätze. ".repeat(50);
        let chunks = chunk_text(&text, &config(10, 2, 2));
        assert!(!chunks.is_empty());
        let total: usize = text.trim().chars().count();
        assert_eq!(chunks.last().unwrap().end_char, total);
    }

    #[test]
    fn test_paragraph_break_counts_as_boundary() {
        let para = "word ".repeat(50).trim_end().to_string();
        let text = format!("{para}\n\n{para}\n\n{para}");
        // 60 tokens * 4 = 240 chars, close to one paragraph (249 chars).
        let chunks = chunk_text(&text, &config(60, 0, 10));
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(!c.content.starts_with('\n'));
            assert!(!c.content.ends_with('\n'));
        }
    }
}
