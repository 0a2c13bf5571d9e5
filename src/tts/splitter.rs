//! Sentence splitting for segment synthesis

use std::sync::OnceLock;

use regex::Regex;

/// Longest segment handed to the model, in characters
pub const MAX_SEGMENT_CHARS: usize = 120;

fn sentence_re() -> &'static Regex {
    static SENTENCE_RE: OnceLock<Regex> = OnceLock::new();
    SENTENCE_RE.get_or_init(|| Regex::new(r"[^。！？!?；;]*[。！？!?；;]?").expect("valid regex"))
}

fn word_re() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| Regex::new(r"\w").expect("valid regex"))
}

/// Whether a segment has anything speakable in it
#[must_use]
pub fn has_word_char(text: &str) -> bool {
    word_re().is_match(text)
}

/// Split text into ordered segments of at most [`MAX_SEGMENT_CHARS`] characters
///
/// Sentence terminators stay attached to their sentence. Pieces without any
/// word character (pure punctuation) are dropped.
#[must_use]
pub fn split_text(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut sentences: Vec<&str> = sentence_re()
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        sentences.push(text);
    }

    sentences
        .into_iter()
        .flat_map(chunk_chars)
        .filter(|piece| has_word_char(piece))
        .collect()
}

fn chunk_chars(sentence: &str) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(MAX_SEGMENT_CHARS)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}
