//! Fuzzy query - matches terms within an edit distance
//!
//! ```text
//! title:rusk~      rust, rush, ...
//! title:elixr~1    elixir
//! ```

use super::multi_term::{expand_terms, scope_key, union_scorer, DEFAULT_MAX_EXPANSIONS};
use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::Scorer;
use crate::schema::FieldId;

/// Largest edit distance a fuzzy query accepts
pub const MAX_FUZZINESS: u32 = 2;

/// Query that matches terms within a Levenshtein distance of `term`.
///
/// Closer terms win when more than `max_expansions` qualify. Every match
/// scores `boost`.
#[derive(Clone, Debug)]
pub struct FuzzyQuery {
    pub field: FieldId,
    /// Restricts the expansion to one path of a JSON field
    pub json_path: Option<String>,
    pub term: String,
    /// Maximum edit distance (default: 2)
    pub fuzziness: u32,
    /// Number of leading characters that must match exactly (default: 0)
    pub prefix_length: usize,
    /// Maximum number of terms to expand (default: 50)
    pub max_expansions: usize,
    pub boost: f32,
}

impl FuzzyQuery {
    pub fn new(field: FieldId, term: impl Into<String>) -> Self {
        Self {
            field,
            json_path: None,
            term: term.into(),
            fuzziness: MAX_FUZZINESS,
            prefix_length: 0,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            boost: 1.0,
        }
    }

    pub fn with_json_path(mut self, path: impl Into<String>) -> Self {
        self.json_path = Some(path.into());
        self
    }

    pub fn with_fuzziness(mut self, fuzziness: u32) -> Self {
        self.fuzziness = fuzziness.min(MAX_FUZZINESS);
        self
    }

    pub fn with_prefix_length(mut self, prefix_length: usize) -> Self {
        self.prefix_length = prefix_length;
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

    /// The leading characters every expansion shares with `term`
    pub fn required_prefix(&self) -> &str {
        match self.term.char_indices().nth(self.prefix_length) {
            Some((end, _)) => &self.term[..end],
            None => &self.term,
        }
    }

    /// Edit distance from `term`, if within the fuzziness
    pub fn distance(&self, candidate: &str) -> Option<u32> {
        let max = self.fuzziness as usize;
        let len = self.term.chars().count();
        let other = candidate.chars().count();
        if len.abs_diff(other) > max {
            return None;
        }
        let distance = strsim::levenshtein(&self.term, candidate);
        (distance <= max).then_some(distance as u32)
    }
}

impl QueryNode for FuzzyQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let scope = scope_key(self.field, self.json_path.as_deref());
        let lists = expand_terms(ctx, &scope, self.required_prefix(), self.max_expansions, |text| {
            self.distance(text)
        });
        union_scorer(ctx, &lists, self.boost)
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        let spread = 1 + self.fuzziness as u64;
        ctx.reader().num_docs() as u64 * spread / (1 + self.prefix_length as u64)
    }

    fn query_type(&self) -> &'static str {
        "fuzzy"
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
