//! Recursive descent parser for query strings
//!
//! # Grammar
//!
//! ```text
//! query       := or_expr EOF
//! or_expr     := and_expr (OR? and_expr)*
//! and_expr    := unary (AND unary)*
//! unary       := (NOT | '-' | '+')? boosted
//! boosted     := primary ('^' number)?
//! primary     := '(' or_expr ')' | '*' | '_exists_' ':' field
//!              | field ':' value | value
//! value       := range | phrase | facet_path | pattern | fuzzy | word
//!              | '*' | '(' or_expr ')'
//! range       := '[' bound TO bound ']'      ; inclusive, '*' is open
//! pattern     := word holding '*' or '?'     ; 'pre*' is a prefix query
//! fuzzy       := word '~' digit?             ; edit distance, default 2
//! ```
//!
//! `field:*` is the same as `_exists_:field`. Patterns and fuzzy words are
//! not analyzed, only lowercased when the field's analyzer lowercases.
//!
//! Adjacent clauses default to OR. Values are resolved against the schema
//! while parsing, so every error surfaces before anything executes.

use std::ops::Bound;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::lexer::{Lexer, ParseResult, Token};
use crate::document::Facet;
use crate::error::QueryError;
use crate::query::ast::QueryNode;
use crate::query::nodes::{
    has_wildcards, unescape_pattern, AllDocsQuery, BoolQuery, ExistsQuery, FacetQuery, FuzzyQuery,
    PhraseQuery, PrefixQuery, RangeQuery, TermQuery, WildcardQuery,
};
use crate::schema::{f64_to_u64, i64_to_u64, json_number_token, FieldId, FieldKind, Schema, Term};
use crate::tokenizer::{Analyzer, Token as TextToken, Tokenize};

/// Pseudo field naming the field an exists query checks
const EXISTS_KEYWORD: &str = "_exists_";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Occur {
    Should,
    Must,
    MustNot,
}

/// A field target, with the JSON path for `field.path` names
#[derive(Clone, Debug)]
struct Target {
    field: FieldId,
    json_path: Option<String>,
}

pub struct QueryStringParser<'a> {
    schema: &'a Schema,
    lexer: Lexer,
    current_token: Token,
    current_start: usize,
    /// Field applied to bare values inside `field:( ... )`
    scope: Option<Target>,
}

impl<'a> QueryStringParser<'a> {
    pub fn new(input: &str, schema: &'a Schema) -> ParseResult<Self> {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;
        let current_start = lexer.token_start();
        Ok(Self {
            schema,
            lexer,
            current_token,
            current_start,
            scope: None,
        })
    }

    pub fn parse(&mut self) -> ParseResult<Box<dyn QueryNode>> {
        if self.current_token == Token::Eof {
            return Err(self.syntax("empty query"));
        }
        let query = self.parse_or_expr()?;
        if self.current_token != Token::Eof {
            return Err(self.syntax(format!("unexpected {:?}", self.current_token)));
        }
        Ok(query)
    }

    fn parse_or_expr(&mut self) -> ParseResult<Box<dyn QueryNode>> {
        let mut clauses = vec![self.parse_and_expr()?];
        loop {
            if self.current_token == Token::Or {
                self.advance()?;
                clauses.push(self.parse_and_expr()?);
            } else if self.current_token.starts_clause() {
                clauses.push(self.parse_and_expr()?);
            } else {
                break;
            }
        }

        if clauses.len() == 1 && clauses[0].0 == Occur::Should {
            if let Some((_, node)) = clauses.pop() {
                return Ok(node);
            }
        }
        let mut query = BoolQuery::new();
        for (occur, node) in clauses {
            match occur {
                Occur::Should => query.should.push(node),
                Occur::Must => query.must.push(node),
                Occur::MustNot => query.must_not.push(node),
            }
        }
        Ok(Box::new(query))
    }

    fn parse_and_expr(&mut self) -> ParseResult<(Occur, Box<dyn QueryNode>)> {
        let first = self.parse_unary()?;
        if self.current_token != Token::And {
            return Ok(first);
        }

        let mut query = BoolQuery::new();
        let mut add = |(occur, node): (Occur, Box<dyn QueryNode>)| match occur {
            Occur::MustNot => query.must_not.push(node),
            Occur::Should | Occur::Must => query.must.push(node),
        };
        add(first);
        while self.current_token == Token::And {
            self.advance()?;
            add(self.parse_unary()?);
        }
        Ok((Occur::Should, Box::new(query)))
    }

    fn parse_unary(&mut self) -> ParseResult<(Occur, Box<dyn QueryNode>)> {
        let occur = match self.current_token {
            Token::Not | Token::Minus => Occur::MustNot,
            Token::Plus => Occur::Must,
            _ => return Ok((Occur::Should, self.parse_boosted()?)),
        };
        self.advance()?;
        Ok((occur, self.parse_boosted()?))
    }

    fn parse_boosted(&mut self) -> ParseResult<Box<dyn QueryNode>> {
        let mut node = self.parse_primary()?;
        if let Token::Caret(boost) = self.current_token {
            node.apply_boost(boost);
            self.advance()?;
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> ParseResult<Box<dyn QueryNode>> {
        let start = self.current_start;
        match self.current_token.clone() {
            Token::LeftParen => self.parse_group(),
            Token::Asterisk => {
                self.advance()?;
                Ok(Box::new(AllDocsQuery::new()))
            }
            Token::Term(word) => {
                self.advance()?;
                self.parse_word_or_field(word, start)
            }
            Token::To => {
                self.advance()?;
                self.parse_word_or_field("to".to_string(), start)
            }
            Token::Wildcard(pattern) => {
                self.advance()?;
                match self.scope.clone() {
                    Some(target) => self.pattern_query(&target, &pattern, start),
                    None => self.over_default_fields(start, |parser, target| {
                        parser.pattern_query(&target, &pattern, start)
                    }),
                }
            }
            Token::QuotedString(phrase) => {
                self.advance()?;
                match self.scope.clone() {
                    Some(target) => self.phrase_query(&target, &phrase, start),
                    None => self.default_fields_query(&phrase),
                }
            }
            Token::FacetPath(path) => {
                self.advance()?;
                match self.scope.clone() {
                    Some(target) => self.facet_query(&target, &path, start),
                    None => self.facet_fields_query(&path, start),
                }
            }
            Token::Eof => Err(self.syntax("unexpected end of query")),
            other => Err(self.syntax(format!("unexpected {:?}", other))),
        }
    }

    fn parse_group(&mut self) -> ParseResult<Box<dyn QueryNode>> {
        self.advance()?;
        if self.current_token == Token::RightParen {
            return Err(self.syntax("empty group"));
        }
        let node = self.parse_or_expr()?;
        self.expect(Token::RightParen)?;
        Ok(node)
    }

    fn parse_word_or_field(&mut self, word: String, start: usize) -> ParseResult<Box<dyn QueryNode>> {
        if let Token::Tilde(distance) = self.current_token {
            self.advance()?;
            return match self.scope.clone() {
                Some(target) => self.fuzzy_query(&target, &word, distance),
                None => self.over_default_fields(start, |parser, target| {
                    parser.fuzzy_query(&target, &word, distance)
                }),
            };
        }
        if self.current_token != Token::Colon {
            return match self.scope.clone() {
                Some(target) => self.word_query(&target, &word, start),
                None => self.default_fields_query(&word),
            };
        }
        self.advance()?;
        if word == EXISTS_KEYWORD && self.schema.field(EXISTS_KEYWORD).is_none() {
            let Token::Term(name) = self.current_token.clone() else {
                return Err(self.syntax(format!("expected a field name after {}:", EXISTS_KEYWORD)));
            };
            self.advance()?;
            let target = self.resolve_field(&name)?;
            return self.exists_query(&target);
        }
        let target = self.resolve_field(&word)?;
        self.parse_field_value(target)
    }

    fn parse_field_value(&mut self, target: Target) -> ParseResult<Box<dyn QueryNode>> {
        let start = self.current_start;
        match self.current_token.clone() {
            Token::LeftBracket => self.parse_range(&target),
            Token::Term(word) => {
                self.advance()?;
                if let Token::Tilde(distance) = self.current_token {
                    self.advance()?;
                    return self.fuzzy_query(&target, &word, distance);
                }
                self.word_query(&target, &word, start)
            }
            Token::To => {
                self.advance()?;
                self.word_query(&target, "to", start)
            }
            Token::Wildcard(pattern) => {
                self.advance()?;
                self.pattern_query(&target, &pattern, start)
            }
            Token::Asterisk => {
                self.advance()?;
                self.exists_query(&target)
            }
            Token::Minus => {
                // negative number, as in temperature:-5
                self.advance()?;
                match self.current_token.clone() {
                    Token::Term(word) => {
                        self.advance()?;
                        self.word_query(&target, &format!("-{}", word), start)
                    }
                    _ => Err(self.syntax("expected a value after '-'")),
                }
            }
            Token::QuotedString(phrase) => {
                self.advance()?;
                self.phrase_query(&target, &phrase, start)
            }
            Token::FacetPath(path) => {
                self.advance()?;
                self.facet_query(&target, &path, start)
            }
            Token::LeftParen => {
                let outer = self.scope.replace(target);
                let group = self.parse_group();
                self.scope = outer;
                group
            }
            other => Err(self.syntax(format!("expected a value, got {:?}", other))),
        }
    }

    fn parse_range(&mut self, target: &Target) -> ParseResult<Box<dyn QueryNode>> {
        let name = self.target_name(target);
        let entry = self.schema.entry(target.field);
        if target.json_path.is_some() || !entry.kind.is_numeric() || !entry.is_fast() {
            return Err(QueryError::TypeMismatch {
                field: name,
                reason: "range queries need a fast numeric field".to_string(),
            });
        }
        let kind = entry.kind;

        self.advance()?;
        let lower = self.parse_range_bound(kind, &name)?;
        self.expect(Token::To)?;
        let upper = self.parse_range_bound(kind, &name)?;
        self.expect(Token::RightBracket)?;
        Ok(Box::new(RangeQuery::new(target.field, lower, upper)))
    }

    fn parse_range_bound(&mut self, kind: FieldKind, name: &str) -> ParseResult<Bound<u64>> {
        let text = match self.current_token.clone() {
            Token::Asterisk => {
                self.advance()?;
                return Ok(Bound::Unbounded);
            }
            Token::Term(word) => word,
            Token::Minus => {
                self.advance()?;
                match self.current_token.clone() {
                    Token::Term(word) => format!("-{}", word),
                    _ => return Err(self.syntax("expected a number after '-'")),
                }
            }
            other => return Err(self.syntax(format!("expected a range bound, got {:?}", other))),
        };
        self.advance()?;
        parse_sortable(kind, &text)
            .map(Bound::Included)
            .ok_or_else(|| QueryError::TypeMismatch {
                field: name.to_string(),
                reason: format!("'{}' is not a valid {}", text, kind),
            })
    }

    /// Bare value against every default search field, OR-ed together
    fn default_fields_query(&self, text: &str) -> ParseResult<Box<dyn QueryNode>> {
        self.over_default_fields(self.current_start, |parser, target| {
            let field = target.field;
            let tokens = parser.schema.analyzer(field).tokenize(text);
            Ok(text_query(tokens, |token| Term::from_field_text(field, token)))
        })
    }

    /// One node per default search field, OR-ed together
    fn over_default_fields<F>(&self, start: usize, mut make: F) -> ParseResult<Box<dyn QueryNode>>
    where
        F: FnMut(&Self, Target) -> ParseResult<Box<dyn QueryNode>>,
    {
        let fields = self.schema.default_search_fields();
        if fields.is_empty() {
            return Err(QueryError::Syntax {
                position: start,
                message: "no indexed text field to search; name a field".to_string(),
            });
        }
        let nodes = fields
            .into_iter()
            .map(|field| {
                make(
                    self,
                    Target {
                        field,
                        json_path: None,
                    },
                )
            })
            .collect::<ParseResult<Vec<_>>>()?;
        Ok(any_of(nodes))
    }

    /// Bare facet path against every indexed facet field, OR-ed together
    fn facet_fields_query(&self, path: &str, start: usize) -> ParseResult<Box<dyn QueryNode>> {
        let fields: Vec<FieldId> = self
            .schema
            .fields()
            .filter(|(_, entry)| entry.kind == FieldKind::Facet && entry.is_indexed())
            .map(|(id, _)| id)
            .collect();
        if fields.is_empty() {
            return Err(QueryError::Syntax {
                position: start,
                message: "no indexed facet field to search; name a field".to_string(),
            });
        }
        let facet = Facet::from_path(path).map_err(|_| QueryError::Syntax {
            position: start,
            message: format!("invalid facet path '{}'", path),
        })?;
        let nodes: Vec<Box<dyn QueryNode>> = fields
            .into_iter()
            .map(|field| Box::new(FacetQuery::new(field, facet.clone())) as Box<dyn QueryNode>)
            .collect();
        Ok(any_of(nodes))
    }

    /// Text a prefix, wildcard or fuzzy query on `target` expands from,
    /// normalized the way the field's tokens were
    fn multi_term_text(&self, target: &Target, text: &str, kind: &str) -> ParseResult<String> {
        let entry = self.schema.entry(target.field);
        let lowercase = match entry.kind {
            FieldKind::Text => self.schema.analyzer(target.field).lowercases(),
            FieldKind::Json if target.json_path.is_some() => Analyzer::Simple.lowercases(),
            _ => {
                return Err(QueryError::TypeMismatch {
                    field: self.target_name(target),
                    reason: format!("{} queries need a text field or a json path", kind),
                })
            }
        };
        self.require_indexed(target)?;
        Ok(if lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        })
    }

    /// `pre*` becomes a prefix query, any other pattern a wildcard query
    fn pattern_query(&self, target: &Target, pattern: &str, start: usize) -> ParseResult<Box<dyn QueryNode>> {
        let pattern = self.multi_term_text(target, pattern, "wildcard")?;
        if let Some(prefix) = literal_before_trailing_star(&pattern) {
            let mut query = PrefixQuery::new(target.field, prefix);
            query.json_path = target.json_path.clone();
            return Ok(Box::new(query));
        }
        let mut query = WildcardQuery::new(target.field, pattern.as_str()).map_err(|e| {
            QueryError::Syntax {
                position: start,
                message: format!("invalid wildcard pattern: {}", e),
            }
        })?;
        query.json_path = target.json_path.clone();
        Ok(Box::new(query))
    }

    fn fuzzy_query(&self, target: &Target, word: &str, distance: u32) -> ParseResult<Box<dyn QueryNode>> {
        let text = self.multi_term_text(target, word, "fuzzy")?;
        let mut query = FuzzyQuery::new(target.field, text).with_fuzziness(distance);
        query.json_path = target.json_path.clone();
        Ok(Box::new(query))
    }

    fn exists_query(&self, target: &Target) -> ParseResult<Box<dyn QueryNode>> {
        let entry = self.schema.entry(target.field);
        let searchable = entry.is_indexed() || (entry.is_fast() && target.json_path.is_none());
        if !searchable {
            return Err(QueryError::TypeMismatch {
                field: self.target_name(target),
                reason: "field is neither indexed nor fast".to_string(),
            });
        }
        let mut query = ExistsQuery::new(target.field);
        query.json_path = target.json_path.clone();
        Ok(Box::new(query))
    }

    fn word_query(&self, target: &Target, word: &str, start: usize) -> ParseResult<Box<dyn QueryNode>> {
        let field = target.field;
        let entry = self.schema.entry(field);
        let name = self.target_name(target);
        let mismatch = |reason: String| QueryError::TypeMismatch {
            field: name.clone(),
            reason,
        };

        match entry.kind {
            FieldKind::Text => {
                self.require_indexed(target)?;
                let tokens = self.schema.analyzer(field).tokenize(word);
                Ok(text_query(tokens, |token| Term::from_field_text(field, token)))
            }
            kind @ (FieldKind::U64 | FieldKind::I64 | FieldKind::F64) => {
                let value = parse_sortable(kind, word)
                    .ok_or_else(|| mismatch(format!("'{}' is not a valid {}", word, kind)))?;
                if entry.is_indexed() {
                    Ok(Box::new(TermQuery::new(Term::from_field_u64(field, value))))
                } else if entry.is_fast() {
                    Ok(Box::new(RangeQuery::new(
                        field,
                        Bound::Included(value),
                        Bound::Included(value),
                    )))
                } else {
                    Err(mismatch("field is neither indexed nor fast".to_string()))
                }
            }
            FieldKind::Bytes => {
                self.require_indexed(target)?;
                let bytes = STANDARD
                    .decode(word)
                    .map_err(|_| mismatch(format!("'{}' is not valid base64", word)))?;
                Ok(Box::new(TermQuery::new(Term::from_field_bytes(field, &bytes))))
            }
            FieldKind::Facet => {
                if word.starts_with('/') {
                    self.facet_query(target, word, start)
                } else {
                    Err(mismatch("facet values are paths such as /a/b".to_string()))
                }
            }
            FieldKind::Json => {
                self.require_indexed(target)?;
                let Some(path) = target.json_path.as_deref() else {
                    return Err(mismatch("json fields are queried as field.path:value".to_string()));
                };
                if word == "true" || word == "false" {
                    return Ok(Box::new(TermQuery::new(Term::from_json_path(field, path, word))));
                }
                if let Some(token) = json_number_token(word) {
                    return Ok(Box::new(TermQuery::new(Term::from_json_path(field, path, &token))));
                }
                let tokens = Analyzer::Simple.tokenize(word);
                Ok(text_query(tokens, |token| Term::from_json_path(field, path, token)))
            }
        }
    }

    fn phrase_query(&self, target: &Target, phrase: &str, start: usize) -> ParseResult<Box<dyn QueryNode>> {
        let field = target.field;
        match self.schema.entry(field).kind {
            FieldKind::Text => {
                self.require_indexed(target)?;
                let tokens = self.schema.analyzer(field).tokenize(phrase);
                Ok(text_query(tokens, |token| Term::from_field_text(field, token)))
            }
            FieldKind::Json => {
                self.require_indexed(target)?;
                let Some(path) = target.json_path.as_deref() else {
                    return Err(QueryError::TypeMismatch {
                        field: self.target_name(target),
                        reason: "json fields are queried as field.path:value".to_string(),
                    });
                };
                let tokens = Analyzer::Simple.tokenize(phrase);
                Ok(text_query(tokens, |token| Term::from_json_path(field, path, token)))
            }
            _ => self.word_query(target, phrase, start),
        }
    }

    fn facet_query(&self, target: &Target, path: &str, start: usize) -> ParseResult<Box<dyn QueryNode>> {
        if self.schema.entry(target.field).kind != FieldKind::Facet {
            return Err(QueryError::TypeMismatch {
                field: self.target_name(target),
                reason: "facet paths only apply to facet fields".to_string(),
            });
        }
        self.require_indexed(target)?;
        let facet = Facet::from_path(path).map_err(|_| QueryError::Syntax {
            position: start,
            message: format!("invalid facet path '{}'", path),
        })?;
        Ok(Box::new(FacetQuery::new(target.field, facet)))
    }

    /// `name` is a field, or `json_field.path.to.key`
    fn resolve_field(&self, name: &str) -> ParseResult<Target> {
        if let Some(field) = self.schema.field(name) {
            return Ok(Target {
                field,
                json_path: None,
            });
        }
        if let Some((base, path)) = name.split_once('.') {
            if let Some(field) = self.schema.field(base) {
                if self.schema.entry(field).kind == FieldKind::Json && !path.is_empty() {
                    return Ok(Target {
                        field,
                        json_path: Some(path.to_string()),
                    });
                }
            }
        }
        Err(QueryError::UnknownField(name.to_string()))
    }

    fn require_indexed(&self, target: &Target) -> ParseResult<()> {
        if self.schema.entry(target.field).is_indexed() {
            Ok(())
        } else {
            Err(QueryError::TypeMismatch {
                field: self.target_name(target),
                reason: "field is not indexed".to_string(),
            })
        }
    }

    fn target_name(&self, target: &Target) -> String {
        let name = self.schema.field_name(target.field);
        match &target.json_path {
            Some(path) => format!("{}.{}", name, path),
            None => name.to_string(),
        }
    }

    fn advance(&mut self) -> ParseResult<()> {
        self.current_token = self.lexer.next_token()?;
        self.current_start = self.lexer.token_start();
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current_token == expected {
            self.advance()
        } else {
            Err(self.syntax(format!(
                "expected {:?}, got {:?}",
                expected, self.current_token
            )))
        }
    }

    fn syntax(&self, message: impl Into<String>) -> QueryError {
        QueryError::Syntax {
            position: self.current_start,
            message: message.into(),
        }
    }
}

/// Order-preserving u64 form of a numeric literal for a field kind
fn parse_sortable(kind: FieldKind, text: &str) -> Option<u64> {
    match kind {
        FieldKind::U64 => text.parse::<u64>().ok(),
        FieldKind::I64 => text.parse::<i64>().ok().map(i64_to_u64),
        FieldKind::F64 => text
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(f64_to_u64),
        _ => None,
    }
}

/// Single node, or a should-only bool over several
fn any_of(mut nodes: Vec<Box<dyn QueryNode>>) -> Box<dyn QueryNode> {
    if nodes.len() == 1 {
        if let Some(node) = nodes.pop() {
            return node;
        }
    }
    let mut query = BoolQuery::new();
    query.should = nodes;
    Box::new(query)
}

/// Unescaped literal of a pattern whose only wildcard is one trailing `*`
fn literal_before_trailing_star(pattern: &str) -> Option<String> {
    let head = pattern.strip_suffix('*')?;
    let escapes = head.chars().rev().take_while(|&ch| ch == '\\').count();
    if escapes % 2 == 1 || has_wildcards(head) {
        return None;
    }
    Some(unescape_pattern(head))
}

/// Node for analyzed text: a term, a phrase, or nothing at all when the
/// analyzer dropped every token
fn text_query(tokens: Vec<TextToken>, make_term: impl Fn(&str) -> Term) -> Box<dyn QueryNode> {
    match tokens.len() {
        0 => Box::new(BoolQuery::new()),
        1 => Box::new(TermQuery::new(make_term(&tokens[0].text))),
        _ => {
            let first = tokens[0].position;
            let terms = tokens
                .iter()
                .map(|token| (token.position - first, make_term(&token.text)))
                .collect();
            Box::new(PhraseQuery::new(terms))
        }
    }
}
