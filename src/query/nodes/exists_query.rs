//! Exists query - documents with any value in a field

use std::ops::Bound;

use roaring::RoaringBitmap;

use super::multi_term::scope_key;
use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::{BitSetScorer, EmptyScorer, Scorer};
use crate::schema::{FieldId, JSON_PATH_END};

/// Matches documents holding at least one value in `field`.
///
/// Fast fields answer from their column; other fields from their indexed
/// terms. With a JSON path, nested keys below the path count too, so
/// `attrs.dims` matches a document with `attrs.dims.height`. Every match
/// scores `boost`.
#[derive(Clone, Debug)]
pub struct ExistsQuery {
    pub field: FieldId,
    pub json_path: Option<String>,
    pub boost: f32,
}

impl ExistsQuery {
    pub fn new(field: FieldId) -> Self {
        Self {
            field,
            json_path: None,
            boost: 1.0,
        }
    }

    pub fn with_json_path(mut self, path: impl Into<String>) -> Self {
        self.json_path = Some(path.into());
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    /// Term key prefixes whose presence marks a value
    fn key_prefixes(&self) -> Vec<Vec<u8>> {
        let scope = scope_key(self.field, None);
        match &self.json_path {
            Some(path) => {
                let mut exact = scope.clone();
                exact.extend_from_slice(path.as_bytes());
                let mut nested = exact.clone();
                exact.push(JSON_PATH_END);
                nested.push(b'.');
                vec![exact, nested]
            }
            None => vec![scope],
        }
    }
}

impl QueryNode for ExistsQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let reader = ctx.reader();
        let mut docs = match (&self.json_path, reader.fast_column(self.field)) {
            (None, Some(column)) => column.range_docs(Bound::Unbounded, Bound::Unbounded),
            _ => {
                let mut docs = RoaringBitmap::new();
                for prefix in self.key_prefixes() {
                    let mut lists = Vec::new();
                    reader.terms().visit_prefix(&prefix, |_, info| {
                        lists.push(*info);
                        true
                    });
                    for info in &lists {
                        docs |= reader.docs_for(info)?;
                    }
                }
                docs
            }
        };
        docs -= ctx.live().deleted();
        if docs.is_empty() {
            return Ok(Box::new(EmptyScorer));
        }
        Ok(Box::new(BitSetScorer::new(docs, self.boost)))
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        ctx.reader().num_docs() as u64
    }

    fn query_type(&self) -> &'static str {
        "exists"
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
