//! Searching committed generations
//!
//! - `Searcher`: snapshot-isolated view of one generation
//! - `IndexReader`: hands out searchers per a `ReloadPolicy`
//! - executor: per-segment plan execution and bounded top-k collection
//! - facets: per-child counts of matching documents
//! - aggregations: buckets and metrics over fast numeric fields

pub mod aggregations;
mod executor;
mod facets;
mod reader;
mod searcher;

pub use aggregations::{
    parse_aggregations, Aggregation, AggregationResult, AggregationResults, Aggregations, Bucket,
    Stats,
};
pub use executor::SearchHit;
pub use facets::FacetCounts;
pub use reader::{IndexReader, ReloadPolicy};
pub use searcher::Searcher;
