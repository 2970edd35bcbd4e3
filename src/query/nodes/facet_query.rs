//! Facet query - a facet path and everything below it

use crate::document::Facet;
use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::{EmptyScorer, Scorer};
use crate::query::nodes::term_query::{TermScorer, TermScoring};
use crate::schema::{FieldId, Term};

/// Matches documents whose facet equals `facet` or lies underneath it.
///
/// Every ancestor of an indexed facet is indexed as its own term, so this
/// is a single postings lookup. Constant score.
#[derive(Clone, Debug)]
pub struct FacetQuery {
    pub field: FieldId,
    pub facet: Facet,
    pub boost: f32,
}

impl FacetQuery {
    pub fn new(field: FieldId, facet: Facet) -> Self {
        Self {
            field,
            facet,
            boost: 1.0,
        }
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    fn term(&self) -> Term {
        Term::from_facet(self.field, &self.facet)
    }
}

impl QueryNode for FacetQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        Ok(
            match TermScorer::open(ctx, &self.term(), TermScoring::Constant(self.boost))? {
                Some(scorer) => Box::new(scorer),
                None => Box::new(EmptyScorer),
            },
        )
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        ctx.reader().doc_freq(&self.term()) as u64
    }

    fn query_type(&self) -> &'static str {
        "facet"
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
