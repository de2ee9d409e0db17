//! Word-based chunking with overlap.
//!
//! Token counts are estimated rather than computed: one word is taken to be
//! 0.75 tokens' worth of budget, so a chunk holds `threshold * 0.75` words.
//! Chinese text has no spaces, so every CJK character counts as one word.
//! Chunks are slices of the original text, whitespace included.

const WORDS_PER_TOKEN: f64 = 0.75;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FF00}'..='\u{FFEF}'
        | '\u{20000}'..='\u{2A6DF}')
}

/// Byte spans of the countable units in `text`.
fn unit_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() || is_cjk(c) {
            if let Some(start) = word_start.take() {
                spans.push((start, i));
            }
            if is_cjk(c) {
                spans.push((i, i + c.len_utf8()));
            }
        } else if word_start.is_none() {
            word_start = Some(i);
        }
    }
    if let Some(start) = word_start {
        spans.push((start, text.len()));
    }
    spans
}

/// Approximate token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    (unit_spans(text).len() as f64 / WORDS_PER_TOKEN).ceil() as usize
}

/// Split `text` into chunks of at most `token_threshold` estimated tokens,
/// each sharing `overlap_rate` of its words with the previous chunk.
pub fn chunk_text(text: &str, token_threshold: usize, overlap_rate: f64) -> Vec<String> {
    let spans = unit_spans(text);
    if spans.is_empty() {
        return Vec::new();
    }

    let size = ((token_threshold as f64 * WORDS_PER_TOKEN) as usize).max(1);
    let overlap = ((size as f64 * overlap_rate.clamp(0.0, 1.0)) as usize).min(size - 1);
    let step = size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(spans.len());
        chunks.push(text[spans[start].0..spans[end - 1].1].to_string());
        if end == spans.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_overlap_by_rate() {
        let chunks = chunk_text("a b c d e f g", 4, 0.34);
        assert_eq!(chunks, vec!["a b c", "c d e", "e f g"]);
    }

    #[test]
    fn test_chunks_without_overlap() {
        let chunks = chunk_text("a b c d e f g", 4, 0.0);
        assert_eq!(chunks, vec!["a b c", "d e f", "g"]);
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        assert_eq!(chunk_text("only  two", 1000, 0.1), vec!["only  two"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("   \n ", 100, 0.1).is_empty());
    }

    #[test]
    fn test_cjk_characters_count_individually() {
        let chunks = chunk_text("一二三四五", 4, 0.34);
        assert_eq!(chunks, vec!["一二三", "三四五"]);
    }

    #[test]
    fn test_mixed_text_keeps_original_slices() {
        let chunks = chunk_text("<p>谣言</p> ok", 1000, 0.0);
        assert_eq!(chunks, vec!["<p>谣言</p> ok"]);
    }

    #[test]
    fn test_full_overlap_still_advances() {
        let chunks = chunk_text("a b c d", 4, 1.0);
        assert_eq!(chunks, vec!["a b c", "b c d"]);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("a b c"), 4);
        assert_eq!(estimate_tokens(""), 0);
    }
}
