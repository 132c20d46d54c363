//! Query DSL lexer
//!
//! Splits a raw query string into tokens, tracking the char position of each
//! token for error carets. `field:` is recognized only when a letter-led run
//! is immediately followed by `:`; a bare `sort` followed by `:` becomes the
//! dedicated sort token.

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Term,
    Phrase,
    Field,
    Colon,
    RangeSep,
    LParen,
    RParen,
    Star,
    And,
    Or,
    Not,
    Minus,
    Sort,
    Eof,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexToken {
    pub kind: TokenKind,
    pub text: String,
    pub position: usize,
}

impl LexToken {
    fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }
}

pub struct QueryLexer<'a> {
    query: &'a str,
    chars: Vec<char>,
}

impl<'a> QueryLexer<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            chars: query.chars().collect(),
        }
    }

    pub fn tokenize(&self) -> Result<Vec<LexToken>> {
        let mut tokens = Vec::new();
        let mut index = 0usize;

        while index < self.chars.len() {
            let ch = self.chars[index];
            if ch.is_whitespace() {
                index += 1;
                continue;
            }

            match ch {
                '"' => {
                    index = self.read_phrase(index, &mut tokens)?;
                    continue;
                }
                '(' => {
                    tokens.push(LexToken::new(TokenKind::LParen, "(", index));
                    index += 1;
                    continue;
                }
                ')' => {
                    tokens.push(LexToken::new(TokenKind::RParen, ")", index));
                    index += 1;
                    continue;
                }
                '*' => {
                    tokens.push(LexToken::new(TokenKind::Star, "*", index));
                    index += 1;
                    continue;
                }
                ':' => {
                    tokens.push(LexToken::new(TokenKind::Colon, ":", index));
                    index += 1;
                    continue;
                }
                '-' => {
                    tokens.push(LexToken::new(TokenKind::Minus, "-", index));
                    index += 1;
                    continue;
                }
                '.' if self.peek_is(index + 1, '.') => {
                    tokens.push(LexToken::new(TokenKind::RangeSep, "..", index));
                    index += 2;
                    continue;
                }
                _ => {}
            }

            let token_start = index;
            while index < self.chars.len() && !self.is_token_boundary(index) {
                index += 1;
            }
            if token_start == index {
                return Err(EngineError::parse(
                    format!("unrecognized character '{ch}'"),
                    index,
                    self.query,
                    "remove the character or quote it inside a phrase",
                ));
            }

            let value: String = self.chars[token_start..index].iter().collect();
            let upper = value.to_uppercase();
            let kind = match upper.as_str() {
                "AND" => TokenKind::And,
                "OR" => TokenKind::Or,
                "NOT" => TokenKind::Not,
                _ if self.is_sort_prefix(&value, index) => TokenKind::Sort,
                _ if self.is_field_name(&value, index) => TokenKind::Field,
                _ => TokenKind::Term,
            };
            tokens.push(LexToken::new(kind, value, token_start));
        }

        tokens.push(LexToken::new(TokenKind::Eof, "", self.chars.len()));
        Ok(tokens)
    }

    /// Read a double-quoted phrase supporting `\"` and `\\` escapes
    fn read_phrase(&self, quote_index: usize, tokens: &mut Vec<LexToken>) -> Result<usize> {
        let mut index = quote_index + 1;
        let mut phrase = String::new();
        let mut closed = false;

        while index < self.chars.len() {
            let ch = self.chars[index];
            if ch == '\\' && index + 1 < self.chars.len() {
                let escaped = self.chars[index + 1];
                if escaped == '"' || escaped == '\\' {
                    phrase.push(escaped);
                    index += 2;
                    continue;
                }
            }
            if ch == '"' {
                closed = true;
                index += 1;
                break;
            }
            phrase.push(ch);
            index += 1;
        }

        if !closed {
            return Err(EngineError::parse(
                "unterminated quote",
                quote_index,
                self.query,
                "close the quote with a matching '\"'",
            ));
        }
        tokens.push(LexToken::new(TokenKind::Phrase, phrase, quote_index));
        Ok(index)
    }

    fn is_token_boundary(&self, index: usize) -> bool {
        let ch = self.chars[index];
        if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ':' | '*') {
            return true;
        }
        ch == '.' && self.peek_is(index + 1, '.')
    }

    fn peek_is(&self, index: usize, expected: char) -> bool {
        self.chars.get(index).copied() == Some(expected)
    }

    fn is_sort_prefix(&self, value: &str, end: usize) -> bool {
        value.eq_ignore_ascii_case("sort") && self.peek_is(end, ':')
    }

    fn is_field_name(&self, value: &str, end: usize) -> bool {
        value
            .chars()
            .next()
            .map(|c| c.is_alphabetic())
            .unwrap_or(false)
            && self.peek_is(end, ':')
    }
}
