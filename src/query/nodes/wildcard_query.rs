//! Wildcard query - matches terms using wildcards
//!
//! Supports:
//! - `*` - matches any sequence of characters
//! - `?` - matches any single character
//!
//! A backslash makes the next character literal, so `\*` matches a star.

use regex::Regex;

use super::multi_term::{expand_terms, scope_key, union_scorer, DEFAULT_MAX_EXPANSIONS};
use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::Scorer;
use crate::schema::FieldId;

/// Query that matches terms against a wildcard pattern.
///
/// Only terms starting with the pattern's literal prefix are read from the
/// dictionary, so a leading wildcard scans the whole field. Every match
/// scores `boost`.
#[derive(Clone, Debug)]
pub struct WildcardQuery {
    pub field: FieldId,
    /// Restricts the expansion to one path of a JSON field
    pub json_path: Option<String>,
    pub pattern: String,
    /// Maximum number of terms to expand (default: 50)
    pub max_expansions: usize,
    pub boost: f32,
    literal_prefix: String,
    regex: Regex,
}

impl WildcardQuery {
    pub fn new(field: FieldId, pattern: impl Into<String>) -> std::result::Result<Self, regex::Error> {
        let pattern = pattern.into();
        let (literal_prefix, regex) = compile_pattern(&pattern)?;
        Ok(Self {
            field,
            json_path: None,
            pattern,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            boost: 1.0,
            literal_prefix,
            regex,
        })
    }

    pub fn with_json_path(mut self, path: impl Into<String>) -> Self {
        self.json_path = Some(path.into());
        self
    }

    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// The text before the first wildcard, with escapes resolved
    pub fn literal_prefix(&self) -> &str {
        &self.literal_prefix
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Whether `pattern` holds an unescaped `*` or `?`
pub fn has_wildcards(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '*' | '?' => return true,
            _ => {}
        }
    }
    false
}

/// Unescape a pattern with no wildcards left in it
pub fn unescape_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            _ => out.push(ch),
        }
    }
    out
}

/// Literal prefix and anchored regex for a wildcard pattern
fn compile_pattern(pattern: &str) -> std::result::Result<(String, Regex), regex::Error> {
    let mut literal_prefix = String::new();
    let mut in_prefix = true;
    let mut expr = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                in_prefix = false;
                expr.push_str(".*");
            }
            '?' => {
                in_prefix = false;
                expr.push('.');
            }
            _ => {
                let literal = if ch == '\\' {
                    match chars.next() {
                        Some(escaped) => escaped,
                        None => '\\',
                    }
                } else {
                    ch
                };
                if in_prefix {
                    literal_prefix.push(literal);
                }
                expr.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
            }
        }
    }
    expr.push('$');
    Ok((literal_prefix, Regex::new(&expr)?))
}

impl QueryNode for WildcardQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let scope = scope_key(self.field, self.json_path.as_deref());
        let lists = expand_terms(ctx, &scope, &self.literal_prefix, self.max_expansions, |text| {
            self.regex.is_match(text).then_some(0)
        });
        union_scorer(ctx, &lists, self.boost)
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        ctx.reader().num_docs() as u64 / (1 + self.literal_prefix.len() as u64)
    }

    fn query_type(&self) -> &'static str {
        "wildcard"
    }

    fn boost(&self) -> f32 {
        self.boost
    }

    fn apply_boost(&mut self, factor: f32) {
        self.boost *= factor;
    }

    fn clone_box(&self) -> Box<dyn QueryNode> {
        Box::new(self.clone())
    }
}
