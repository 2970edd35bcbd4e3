//! Prefix query - matches terms starting with a prefix
//!
//! ```text
//! title:prog*      programming, progress, ...
//! attrs.format:p*  paperback
//! ```

use super::multi_term::{expand_terms, scope_key, union_scorer, DEFAULT_MAX_EXPANSIONS};
use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::Scorer;
use crate::schema::FieldId;

/// Query that matches terms starting with a prefix.
///
/// The prefix is matched against indexed tokens as is; callers normalize it
/// the way the field's analyzer does. Every match scores `boost`.
#[derive(Clone, Debug)]
pub struct PrefixQuery {
    pub field: FieldId,
    /// Restricts the expansion to one path of a JSON field
    pub json_path: Option<String>,
    pub prefix: String,
    /// Maximum number of terms to expand (default: 50)
    pub max_expansions: usize,
    pub boost: f32,
}

impl PrefixQuery {
    pub fn new(field: FieldId, prefix: impl Into<String>) -> Self {
        Self {
            field,
            json_path: None,
            prefix: prefix.into(),
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            boost: 1.0,
        }
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
}

impl QueryNode for PrefixQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let scope = scope_key(self.field, self.json_path.as_deref());
        let lists = expand_terms(ctx, &scope, &self.prefix, self.max_expansions, |_| Some(0));
        union_scorer(ctx, &lists, self.boost)
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        // longer prefixes expand to fewer terms
        ctx.reader().num_docs() as u64 / (1 + self.prefix.len() as u64)
    }

    fn query_type(&self) -> &'static str {
        "prefix"
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
