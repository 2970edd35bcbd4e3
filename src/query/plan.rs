//! Executable query plans

use std::fmt;

use super::ast::QueryNode;
use super::context::QueryContext;
use super::docset::Scorer;
use super::nodes::AllDocsQuery;
use super::query_string::QueryStringParser;
use crate::error::Result;
use crate::schema::Schema;

/// A parsed query, resolved against a schema and ready to run on any
/// segment of an index built from that schema
#[derive(Clone)]
pub struct QueryPlan {
    root: Box<dyn QueryNode>,
}

impl QueryPlan {
    pub fn new(root: Box<dyn QueryNode>) -> Self {
        Self { root }
    }

    /// Parse a query string.
    ///
    /// Fails with `QueryError::Syntax`, `UnknownField` or `TypeMismatch`;
    /// nothing runs for a rejected query.
    pub fn parse(query: &str, schema: &Schema) -> Result<Self> {
        let root = QueryStringParser::new(query, schema)?.parse()?;
        Ok(Self { root })
    }

    /// Every live document
    pub fn all() -> Self {
        Self::new(Box::new(AllDocsQuery::new()))
    }

    pub fn root(&self) -> &dyn QueryNode {
        self.root.as_ref()
    }

    /// Streaming scorer over the live matches of one segment
    pub fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        self.root.scorer(ctx)
    }
}

impl<T: QueryNode + 'static> From<T> for QueryPlan {
    fn from(node: T) -> Self {
        Self::new(Box::new(node))
    }
}

impl fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueryPlan").field(&self.root).finish()
    }
}
