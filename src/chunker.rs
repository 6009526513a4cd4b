//! Trivial text splitting for `load_document`.
//!
//! Turns a document into ordered chunks at one of a few mechanical
//! granularities. No semantic boundary detection or token-budget packing —
//! callers who need that split the text themselves before calling
//! `load_document` with `Manual`.

use crate::config::ChunkGranularity;

/// Split `text` into ordered, non-empty chunks at the given granularity.
/// `Manual` performs no splitting: the whole (trimmed) input becomes the
/// single chunk, for callers who have already segmented the text themselves.
pub fn split(text: &str, granularity: ChunkGranularity) -> Vec<String> {
    match granularity {
        ChunkGranularity::Sentence => split_sentences(text),
        ChunkGranularity::Paragraph => split_paragraphs(text),
        ChunkGranularity::Page => split_pages(text),
        ChunkGranularity::Manual => split_manual(text),
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trailing = current.trim();
    if !trailing.is_empty() {
        chunks.push(trailing.to_string());
    }
    chunks
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_pages(text: &str) -> Vec<String> {
    text.split('\u{000C}')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_manual(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_splits_on_terminal_punctuation() {
        let chunks = split("Hello there. How are you? Fine!", ChunkGranularity::Sentence);
        assert_eq!(chunks, vec!["Hello there.", "How are you?", "Fine!"]);
    }

    #[test]
    fn sentence_keeps_trailing_fragment_without_terminator() {
        let chunks = split("One sentence. trailing fragment", ChunkGranularity::Sentence);
        assert_eq!(chunks, vec!["One sentence.", "trailing fragment"]);
    }

    #[test]
    fn paragraph_splits_on_blank_lines() {
        let chunks = split("first\n\nsecond\n\n\nthird", ChunkGranularity::Paragraph);
        assert_eq!(chunks, vec!["first", "second", "third"]);
    }

    #[test]
    fn page_splits_on_form_feed() {
        let chunks = split("page one\u{000C}page two", ChunkGranularity::Page);
        assert_eq!(chunks, vec!["page one", "page two"]);
    }

    #[test]
    fn manual_performs_no_splitting() {
        let chunks = split("chunk a\n\n---\n\nchunk b", ChunkGranularity::Manual);
        assert_eq!(chunks, vec!["chunk a\n\n---\n\nchunk b"]);
    }

    #[test]
    fn manual_trims_whitespace() {
        let chunks = split("  \n  hello world  \n  ", ChunkGranularity::Manual);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split("", ChunkGranularity::Paragraph).is_empty());
        assert!(split("   \n\n  ", ChunkGranularity::Paragraph).is_empty());
    }
}
