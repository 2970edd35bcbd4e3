//! Boolean query - combines clauses with AND, OR, NOT semantics

use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::{
    AllScorer, Boosted, EmptyScorer, Exclude, Intersection, RequiredOptional, Scorer, Union,
};

/// Boolean combination of clauses.
///
/// - `must`: every clause must match; scores are summed
/// - `should`: with no `must` clause at least one must match; otherwise
///   optional, adding its score to documents that match anyway
/// - `must_not`: excluded documents; never scores
///
/// A query with only `must_not` clauses matches every live document not
/// excluded, with score 0. A query with no clauses matches nothing.
#[derive(Clone, Debug)]
pub struct BoolQuery {
    pub must: Vec<Box<dyn QueryNode>>,
    pub should: Vec<Box<dyn QueryNode>>,
    pub must_not: Vec<Box<dyn QueryNode>>,
    pub boost: f32,
}

impl Default for BoolQuery {
    fn default() -> Self {
        Self {
            must: Vec::new(),
            should: Vec::new(),
            must_not: Vec::new(),
            boost: 1.0,
        }
    }
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, clause: Box<dyn QueryNode>) -> Self {
        self.must.push(clause);
        self
    }

    pub fn should(mut self, clause: Box<dyn QueryNode>) -> Self {
        self.should.push(clause);
        self
    }

    pub fn must_not(mut self, clause: Box<dyn QueryNode>) -> Self {
        self.must_not.push(clause);
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    fn union_of<'a>(
        clauses: &[Box<dyn QueryNode>],
        ctx: &QueryContext<'a>,
    ) -> Result<Box<dyn Scorer + 'a>> {
        let mut children = clauses
            .iter()
            .map(|clause| clause.scorer(ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(match children.len() {
            0 => Box::new(EmptyScorer),
            1 => children.remove(0),
            _ => Box::new(Union::new(children)),
        })
    }
}

impl QueryNode for BoolQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let matched: Box<dyn Scorer + 'a> = if !self.must.is_empty() {
            // rarest clause drives the intersection
            let mut required: Vec<&Box<dyn QueryNode>> = self.must.iter().collect();
            required.sort_by_key(|clause| clause.estimate_cost(ctx));
            let mut children = required
                .into_iter()
                .map(|clause| clause.scorer(ctx))
                .collect::<Result<Vec<_>>>()?;
            let required: Box<dyn Scorer + 'a> = if children.len() == 1 {
                children.remove(0)
            } else {
                Box::new(Intersection::new(children)?)
            };
            if self.should.is_empty() {
                required
            } else {
                let optional = Self::union_of(&self.should, ctx)?;
                Box::new(RequiredOptional::new(required, optional)?)
            }
        } else if !self.should.is_empty() {
            Self::union_of(&self.should, ctx)?
        } else if !self.must_not.is_empty() {
            Box::new(AllScorer::new(ctx.live(), 0.0))
        } else {
            return Ok(Box::new(EmptyScorer));
        };

        let matched: Box<dyn Scorer + 'a> = if self.must_not.is_empty() {
            matched
        } else {
            let excluded = Self::union_of(&self.must_not, ctx)?;
            Box::new(Exclude::new(matched, excluded)?)
        };
        Ok(Boosted::wrap(matched, self.boost))
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        if !self.must.is_empty() {
            self.must
                .iter()
                .map(|clause| clause.estimate_cost(ctx))
                .min()
                .unwrap_or(0)
        } else if !self.should.is_empty() {
            self.should.iter().map(|clause| clause.estimate_cost(ctx)).sum()
        } else if !self.must_not.is_empty() {
            ctx.reader().num_docs() as u64
        } else {
            0
        }
    }

    fn query_type(&self) -> &'static str {
        "bool"
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
