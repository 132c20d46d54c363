//! CJK run tokenizer
//!
//! Emits every two-character sliding window over a CJK run (a single
//! character when the run has length 1). Offsets are char indices local to
//! the run.

use super::RawToken;

pub fn tokenize_run(chars: &[char]) -> Vec<RawToken> {
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() == 1 {
        return vec![RawToken {
            term: chars[0].to_string(),
            start: 0,
            end: 1,
        }];
    }

    let mut tokens = Vec::with_capacity(chars.len() - 1);
    for index in 0..chars.len() - 1 {
        let term: String = chars[index..index + 2].iter().collect();
        tokens.push(RawToken {
            term,
            start: index,
            end: index + 2,
        });
    }
    tokens
}
