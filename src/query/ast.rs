//! Query tree
//!
//! This module defines the `QueryNode` trait that every query type
//! implements. Once per segment a node builds a `Scorer`: a doc-ordered
//! cursor over the live documents it matches.

use std::fmt::Debug;

use super::context::QueryContext;
use super::docset::Scorer;
use crate::error::Result;

/// Core trait for all query nodes
pub trait QueryNode: Send + Sync + Debug {
    /// Cursor over the matching live documents of the context's segment
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>>;

    /// Rough number of documents this node will visit in the segment.
    ///
    /// Boolean nodes open their cheapest required clause first.
    fn estimate_cost(&self, ctx: &QueryContext) -> u64;

    /// Query type name for debugging and logging
    fn query_type(&self) -> &'static str;

    fn boost(&self) -> f32 {
        1.0
    }

    /// Multiply the node's boost by `factor`
    fn apply_boost(&mut self, factor: f32);

    fn clone_box(&self) -> Box<dyn QueryNode>;
}

impl Clone for Box<dyn QueryNode> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
