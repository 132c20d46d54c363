//! Recursive-descent query parser
//!
//! Grammar (NOT binds tighter than AND, AND tighter than OR; binary
//! operators are left-associative; adjacency is an implicit AND):
//!
//! ```text
//! query      = or_expr [ 'sort' ':' field_name ]
//! or_expr    = and_expr { 'OR' and_expr }
//! and_expr   = unary { ('AND' | implicit) unary }
//! unary      = [ 'NOT' | '-' ] primary
//! primary    = '(' or_expr ')' | field_expr | phrase | prefix | term
//! field_expr = FIELD ':' ( value '..' value | value )
//! ```
//!
//! The sort directive is accepted only at the top-level tail.

use super::ast::{BoolOp, ParsedQuery, QueryNode, SortDirective};
use super::lexer::{LexToken, QueryLexer, TokenKind};
use crate::error::{EngineError, Result};

/// Fields accepted in `field:value` expressions
pub const SUPPORTED_FIELDS: &[&str] = &["path", "ext", "size", "mtime", "type", "filename", "name"];

pub struct QueryParser {
    tokens: Vec<LexToken>,
    pos: usize,
    query: String,
}

impl QueryParser {
    pub fn parse(query: &str) -> Result<ParsedQuery> {
        let tokens = QueryLexer::new(query).tokenize()?;
        let mut parser = Self {
            tokens,
            pos: 0,
            query: query.to_string(),
        };

        let ast = parser.parse_or_expr()?;
        let sort = parser.parse_sort_directive()?;

        if parser.current().kind != TokenKind::Eof {
            let token = parser.current().clone();
            return Err(EngineError::parse(
                format!("unexpected token {:?}", token.text),
                token.position,
                &parser.query,
                "remove the trailing input or combine it with AND/OR",
            ));
        }

        Ok(ParsedQuery { ast, sort })
    }

    fn parse_or_expr(&mut self) -> Result<QueryNode> {
        let mut left = self.parse_and_expr()?;
        while self.matches(TokenKind::Or) {
            let right = self.parse_and_expr()?;
            left = QueryNode::Bool {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<QueryNode> {
        let mut left = self.parse_unary()?;
        loop {
            if self.matches(TokenKind::And) || self.starts_implicit_and() {
                let right = self.parse_unary()?;
                left = QueryNode::Bool {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<QueryNode> {
        if self.matches(TokenKind::Not) || self.matches(TokenKind::Minus) {
            return Ok(QueryNode::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<QueryNode> {
        match self.current().kind {
            TokenKind::LParen => self.parse_group(),
            TokenKind::Field => self.parse_field_expr(),
            TokenKind::Phrase => self.parse_phrase(),
            TokenKind::Term => self.parse_term_or_prefix(),
            _ => {
                let token = self.current().clone();
                Err(EngineError::parse(
                    format!("expected an expression, found {:?}", token.text),
                    token.position,
                    &self.query,
                    "start with a term, a phrase, a field:value pair, or '('",
                ))
            }
        }
    }

    fn parse_group(&mut self) -> Result<QueryNode> {
        self.expect(TokenKind::LParen, "missing '('", "add an opening parenthesis")?;
        let grouped = self.parse_or_expr()?;
        self.expect(TokenKind::RParen, "missing ')'", "close the group with ')'")?;
        Ok(grouped)
    }

    fn parse_field_expr(&mut self) -> Result<QueryNode> {
        let field_token = self.advance().clone();
        let field = field_token.text.to_lowercase();
        if !SUPPORTED_FIELDS.contains(&field.as_str()) {
            return Err(EngineError::parse(
                format!("unsupported field {field:?}"),
                field_token.position,
                &self.query,
                format!("use one of: {}", SUPPORTED_FIELDS.join(", ")),
            ));
        }

        self.expect(
            TokenKind::Colon,
            "field query is missing ':'",
            "write field:value",
        )?;

        let value_token = self.current().clone();
        if !Self::is_value_kind(value_token.kind) {
            return Err(EngineError::parse(
                "field query is missing a value",
                value_token.position,
                &self.query,
                "write field:value or field:\"quoted value\"",
            ));
        }
        self.advance();

        if self.matches(TokenKind::RangeSep) {
            let to_token = self.current().clone();
            if !Self::is_value_kind(to_token.kind) {
                return Err(EngineError::parse(
                    "range query is missing an upper bound",
                    to_token.position,
                    &self.query,
                    "write field:low..high",
                ));
            }
            self.advance();
            return Ok(QueryNode::Range {
                field,
                from: value_token.text,
                to: to_token.text,
            });
        }

        Ok(QueryNode::Field {
            field,
            value: value_token.text,
        })
    }

    fn parse_phrase(&mut self) -> Result<QueryNode> {
        let token = self.advance().clone();
        let terms: Vec<String> = token
            .text
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();
        if terms.is_empty() {
            return Err(EngineError::parse(
                "phrase must not be empty",
                token.position,
                &self.query,
                "put at least one term between the quotes",
            ));
        }
        Ok(QueryNode::Phrase(terms))
    }

    fn parse_term_or_prefix(&mut self) -> Result<QueryNode> {
        let token = self.advance().clone();
        if self.matches(TokenKind::Star) {
            return Ok(QueryNode::Prefix(token.text));
        }
        Ok(QueryNode::Term(token.text))
    }

    /// Trailing `sort:<field>` directive, at most once
    fn parse_sort_directive(&mut self) -> Result<Option<SortDirective>> {
        if !self.matches(TokenKind::Sort) {
            return Ok(None);
        }
        self.expect(
            TokenKind::Colon,
            "sort directive is missing ':'",
            "write sort:mtime or sort:size",
        )?;
        let field_token = self.current().clone();
        if field_token.kind != TokenKind::Term && field_token.kind != TokenKind::Field {
            return Err(EngineError::parse(
                "sort directive is missing a field",
                field_token.position,
                &self.query,
                "write sort:mtime or sort:size",
            ));
        }
        self.advance();
        Ok(Some(SortDirective {
            field: field_token.text,
        }))
    }

    fn is_value_kind(kind: TokenKind) -> bool {
        matches!(kind, TokenKind::Term | TokenKind::Phrase | TokenKind::Field)
    }

    fn starts_implicit_and(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Term
                | TokenKind::Phrase
                | TokenKind::Field
                | TokenKind::LParen
                | TokenKind::Not
                | TokenKind::Minus
        )
    }

    fn current(&self) -> &LexToken {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> &LexToken {
        let token = &self.tokens[self.pos];
        self.pos += 1;
        token
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.current().kind == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str, hint: &str) -> Result<()> {
        if self.matches(kind) {
            Ok(())
        } else {
            let token = self.current().clone();
            Err(EngineError::parse(message, token.position, &self.query, hint))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(query: &str) -> ParsedQuery {
        QueryParser::parse(query).unwrap()
    }

    #[test]
    fn test_single_term() {
        assert_eq!(parse("rust").ast, QueryNode::Term("rust".into()));
    }

    #[test]
    fn test_prefix() {
        assert_eq!(parse("prog*").ast, QueryNode::Prefix("prog".into()));
    }

    #[test]
    fn test_phrase_split() {
        assert_eq!(
            parse("\"quick brown\"").ast,
            QueryNode::Phrase(vec!["quick".into(), "brown".into()])
        );
    }

    #[test]
    fn test_explicit_and() {
        let parsed = parse("Java AND programming");
        match parsed.ast {
            QueryNode::Bool { op, left, right } => {
                assert_eq!(op, BoolOp::And);
                assert_eq!(*left, QueryNode::Term("Java".into()));
                assert_eq!(*right, QueryNode::Term("programming".into()));
            }
            other => panic!("expected bool node, got {other:?}"),
        }
    }

    #[test]
    fn test_implicit_and() {
        let parsed = parse("rust engine");
        assert!(matches!(
            parsed.ast,
            QueryNode::Bool { op: BoolOp::And, .. }
        ));
    }

    #[test]
    fn test_precedence_not_and_or() {
        // NOT a AND b OR c  =>  ((NOT a) AND b) OR c
        let parsed = parse("NOT a AND b OR c");
        match parsed.ast {
            QueryNode::Bool { op: BoolOp::Or, left, right } => {
                assert_eq!(*right, QueryNode::Term("c".into()));
                match *left {
                    QueryNode::Bool { op: BoolOp::And, left, .. } => {
                        assert_eq!(*left, QueryNode::Not(Box::new(QueryNode::Term("a".into()))));
                    }
                    other => panic!("expected AND under OR, got {other:?}"),
                }
            }
            other => panic!("expected OR at top, got {other:?}"),
        }
    }

    #[test]
    fn test_minus_negation() {
        assert_eq!(
            parse("-draft").ast,
            QueryNode::Not(Box::new(QueryNode::Term("draft".into())))
        );
    }

    #[test]
    fn test_grouping() {
        let parsed = parse("(a OR b) AND c");
        match parsed.ast {
            QueryNode::Bool { op: BoolOp::And, left, .. } => {
                assert!(matches!(*left, QueryNode::Bool { op: BoolOp::Or, .. }));
            }
            other => panic!("expected AND at top, got {other:?}"),
        }
    }

    #[test]
    fn test_field_query() {
        assert_eq!(
            parse("ext:md").ast,
            QueryNode::Field {
                field: "ext".into(),
                value: "md".into()
            }
        );
    }

    #[test]
    fn test_field_with_quoted_value() {
        assert_eq!(
            parse("filename:\"readme.md\"").ast,
            QueryNode::Field {
                field: "filename".into(),
                value: "readme.md".into()
            }
        );
    }

    #[test]
    fn test_range_query() {
        assert_eq!(
            parse("size:1..20").ast,
            QueryNode::Range {
                field: "size".into(),
                from: "1".into(),
                to: "20".into()
            }
        );
    }

    #[test]
    fn test_mtime_range_with_quoted_bounds() {
        let parsed = parse("mtime:\"2025-01-01T00:00:00Z\"..\"2025-12-31T00:00:00Z\"");
        assert_eq!(
            parsed.ast,
            QueryNode::Range {
                field: "mtime".into(),
                from: "2025-01-01T00:00:00Z".into(),
                to: "2025-12-31T00:00:00Z".into()
            }
        );
    }

    #[test]
    fn test_unsupported_field_rejected() {
        let err = QueryParser::parse("author:me").unwrap_err();
        assert!(matches!(err, EngineError::QueryParse { .. }));
    }

    #[test]
    fn test_sort_directive_at_tail() {
        let parsed = parse("rust sort:mtime");
        assert_eq!(parsed.sort, Some(SortDirective { field: "mtime".into() }));

        let parsed = parse("rust");
        assert_eq!(parsed.sort, None);
    }

    #[test]
    fn test_sort_not_at_tail_rejected() {
        assert!(QueryParser::parse("sort:mtime rust").is_err());
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(QueryParser::parse("").is_err());
        assert!(QueryParser::parse("   ").is_err());
    }

    #[test]
    fn test_unmatched_paren_rejected() {
        assert!(QueryParser::parse("(rust AND go").is_err());
    }

    #[test]
    fn test_stray_token_rejected() {
        assert!(QueryParser::parse("rust )").is_err());
    }
}
