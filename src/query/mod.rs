//! Query parsing and execution
//!
//! A query string is parsed against the schema into a tree of
//! `QueryNode`s wrapped in a `QueryPlan`. The plan runs once per segment;
//! each node opens a `Scorer`, a cursor over its live matches in doc
//! order, and boolean nodes combine cursors by leapfrog intersection,
//! union and exclusion. Nothing is materialized before collection.
//!
//! # Scoring
//!
//! - term: `tf_weight(tf) * idf * boost`
//! - phrase: the same with tf = phrase frequency and idf summed over terms
//! - range, facet, match-all, exists: constant `boost`
//! - prefix, wildcard, fuzzy: constant `boost`, however many expanded
//!   terms a document holds
//! - AND / OR add up the scores of matching clauses; excluded clauses add 0

pub mod ast;
pub mod context;
pub mod docset;
pub mod nodes;
pub mod plan;
pub mod query_string;

pub use ast::QueryNode;
pub use context::QueryContext;
pub use docset::{collect_docs, DocSet, Scorer};
pub use nodes::{
    AllDocsQuery, BoolQuery, ExistsQuery, FacetQuery, FuzzyQuery, PhraseQuery, PrefixQuery,
    RangeQuery, TermQuery, WildcardQuery,
};
pub use plan::QueryPlan;
