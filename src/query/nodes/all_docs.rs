//! All documents query - matches every live document

use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::{AllScorer, Scorer};

/// Matches every live document with a constant score
#[derive(Clone, Debug)]
pub struct AllDocsQuery {
    pub boost: f32,
}

impl Default for AllDocsQuery {
    fn default() -> Self {
        Self { boost: 1.0 }
    }
}

impl AllDocsQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

impl QueryNode for AllDocsQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        Ok(Box::new(AllScorer::new(ctx.live(), self.boost)))
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        ctx.reader().num_docs() as u64
    }

    fn query_type(&self) -> &'static str {
        "all_docs"
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
