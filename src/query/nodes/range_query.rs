//! Range query - fast field values within bounds

use std::ops::Bound;

use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::{BitSetScorer, EmptyScorer, Scorer};
use crate::schema::{f64_to_u64, i64_to_u64, FieldId};

/// Matches documents with at least one value of a fast numeric field
/// inside the bounds. Constant score.
///
/// Bounds are kept in the order-preserving u64 space fast columns use.
#[derive(Clone, Debug)]
pub struct RangeQuery {
    pub field: FieldId,
    pub lower: Bound<u64>,
    pub upper: Bound<u64>,
    pub boost: f32,
}

impl RangeQuery {
    pub fn new(field: FieldId, lower: Bound<u64>, upper: Bound<u64>) -> Self {
        Self {
            field,
            lower,
            upper,
            boost: 1.0,
        }
    }

    /// Inclusive range over a u64 field
    pub fn u64_range(field: FieldId, lower: u64, upper: u64) -> Self {
        Self::new(field, Bound::Included(lower), Bound::Included(upper))
    }

    /// Inclusive range over an i64 field
    pub fn i64_range(field: FieldId, lower: i64, upper: i64) -> Self {
        Self::new(
            field,
            Bound::Included(i64_to_u64(lower)),
            Bound::Included(i64_to_u64(upper)),
        )
    }

    /// Inclusive range over an f64 field
    pub fn f64_range(field: FieldId, lower: f64, upper: f64) -> Self {
        Self::new(
            field,
            Bound::Included(f64_to_u64(lower)),
            Bound::Included(f64_to_u64(upper)),
        )
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

impl QueryNode for RangeQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let Some(column) = ctx.reader().fast_column(self.field) else {
            return Ok(Box::new(EmptyScorer));
        };
        let mut docs = column.range_docs(self.lower, self.upper);
        docs -= ctx.live().deleted();
        Ok(Box::new(BitSetScorer::new(docs, self.boost)))
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        ctx.reader().num_docs() as u64
    }

    fn query_type(&self) -> &'static str {
        "range"
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
