//! Mixed-script tokenization
//!
//! The composite tokenizer partitions input into maximal runs of CJK
//! (Han, Hiragana, Katakana, Hangul) vs. non-CJK code points and dispatches
//! each run: non-CJK runs split on non-alphanumerics with lowercasing and
//! optional stop-word removal; CJK runs emit character bigrams. The position
//! counter is global across runs, and start/end offsets are char indices
//! into the original input.

mod cjk;
mod latin;
mod stopwords;

pub use stopwords::is_stop_word;

use unicode_script::{Script, UnicodeScript};

/// A term emitted by the tokenizer, with its global position and char offsets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub position: u32,
    pub start_offset: u32,
    pub end_offset: u32,
}

/// Run-local token before global position/offset adjustment
#[derive(Clone, Debug)]
pub(crate) struct RawToken {
    pub term: String,
    pub start: usize,
    pub end: usize,
}

pub fn is_cjk(ch: char) -> bool {
    matches!(
        ch.script(),
        Script::Han | Script::Hiragana | Script::Katakana | Script::Hangul
    )
}

/// Composite tokenizer for mixed Latin + CJK content
#[derive(Clone, Debug)]
pub struct CompositeTokenizer {
    enable_stop_words: bool,
}

impl CompositeTokenizer {
    pub fn new(enable_stop_words: bool) -> Self {
        Self { enable_stop_words }
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut tokens = Vec::new();
        let mut global_position = 0u32;
        let mut cursor = 0usize;

        while cursor < chars.len() {
            let run_is_cjk = is_cjk(chars[cursor]);
            let run_start = cursor;
            let mut run_end = cursor + 1;
            while run_end < chars.len() && is_cjk(chars[run_end]) == run_is_cjk {
                run_end += 1;
            }

            let run = &chars[run_start..run_end];
            let run_tokens = if run_is_cjk {
                cjk::tokenize_run(run)
            } else {
                latin::tokenize_run(run, self.enable_stop_words)
            };

            for raw in run_tokens {
                tokens.push(Token {
                    term: raw.term,
                    position: global_position,
                    start_offset: (run_start + raw.start) as u32,
                    end_offset: (run_start + raw.end) as u32,
                });
                global_position += 1;
            }

            cursor = run_end;
        }

        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(term: &str, position: u32, start: u32, end: u32) -> Token {
        Token {
            term: term.to_string(),
            position,
            start_offset: start,
            end_offset: end,
        }
    }

    #[test]
    fn test_mixed_latin_and_cjk() {
        let tokenizer = CompositeTokenizer::new(false);
        let tokens = tokenizer.tokenize("Go 搜索 engine 引擎");
        assert_eq!(
            tokens,
            vec![
                token("go", 0, 0, 2),
                token("搜索", 1, 3, 5),
                token("engine", 2, 6, 12),
                token("引擎", 3, 13, 15),
            ]
        );
    }

    #[test]
    fn test_positions_global_across_runs() {
        let tokenizer = CompositeTokenizer::new(false);
        let tokens = tokenizer.tokenize("rust全文搜索lib");
        let positions: Vec<u32> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["rust", "全文", "文搜", "搜索", "lib"]);
    }

    #[test]
    fn test_offsets_monotone() {
        let tokenizer = CompositeTokenizer::new(true);
        let tokens = tokenizer.tokenize("the quick 棕色 fox jumps 狐狸");
        let mut last_start = 0;
        for t in &tokens {
            assert!(t.start_offset >= last_start);
            assert!(t.end_offset > t.start_offset);
            last_start = t.start_offset;
        }
    }

    #[test]
    fn test_stop_words_respected() {
        let tokenizer = CompositeTokenizer::new(true);
        let terms: Vec<String> = tokenizer
            .tokenize("the search engine")
            .into_iter()
            .map(|t| t.term)
            .collect();
        assert_eq!(terms, vec!["search", "engine"]);
    }

    #[test]
    fn test_hangul_and_kana() {
        let tokenizer = CompositeTokenizer::new(false);
        let terms: Vec<String> = tokenizer
            .tokenize("한국어 カタカナ")
            .into_iter()
            .map(|t| t.term)
            .collect();
        assert_eq!(terms, vec!["한국", "국어", "カタ", "タカ", "カナ"]);
    }

    #[test]
    fn test_empty_input() {
        let tokenizer = CompositeTokenizer::new(true);
        assert!(tokenizer.tokenize("").is_empty());
    }
}
