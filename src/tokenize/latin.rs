//! Non-CJK run tokenizer
//!
//! Splits a run on non-alphanumeric characters, lowercases, and drops
//! single-character tokens (and stop words when enabled). Offsets are char
//! indices local to the run.

use super::stopwords;
use super::RawToken;

pub fn tokenize_run(chars: &[char], enable_stop_words: bool) -> Vec<RawToken> {
    let mut tokens = Vec::new();
    let mut segment_start = 0usize;

    for (index, &ch) in chars.iter().enumerate() {
        if !ch.is_ascii_alphanumeric() {
            push_if_valid(chars, segment_start, index, enable_stop_words, &mut tokens);
            segment_start = index + 1;
        }
    }
    push_if_valid(chars, segment_start, chars.len(), enable_stop_words, &mut tokens);

    tokens
}

fn push_if_valid(
    chars: &[char],
    start: usize,
    end: usize,
    enable_stop_words: bool,
    tokens: &mut Vec<RawToken>,
) {
    if start >= end {
        return;
    }
    let term: String = chars[start..end]
        .iter()
        .flat_map(|c| c.to_lowercase())
        .collect();
    if term.chars().count() <= 1 {
        return;
    }
    if enable_stop_words && stopwords::is_stop_word(&term) {
        return;
    }
    tokens.push(RawToken {
        term,
        start,
        end,
    });
}
