//! Loupe: an embedded full-text search engine.
//!
//! Documents are validated against a frozen [`Schema`], buffered by the
//! single [`IndexWriter`] and published by `commit()` as immutable segments.
//! Each commit produces a new [`Generation`]; a [`Searcher`] holds one
//! generation for its whole life, so concurrent commits and background
//! merges never change what it sees.
//!
//! ```no_run
//! use loupe::{Document, Index, Schema, FieldOptions, TEXT, STORED};
//!
//! # fn main() -> loupe::Result<()> {
//! let mut builder = Schema::builder();
//! builder.add_text_field("title", TEXT | STORED)?;
//! builder.add_u64_field("timestamp", FieldOptions::fast_stored())?;
//! let index = Index::create_in_ram(builder.freeze())?;
//!
//! let mut writer = index.writer()?;
//! writer.add_document(Document::new().with("title", "Hello World").with("timestamp", 1u64))?;
//! writer.commit()?;
//!
//! let hits = index.searcher().search_str("hello", 10)?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod metrics;
pub mod query;
pub mod schema;
pub mod search;
pub mod segment;
pub mod tokenizer;

pub use config::{IndexSettings, MergePolicyConfig, ScoringConfig, WriterConfig};
pub use document::{Document, Facet, Value};
pub use error::{LoupeError, QueryError, Result, SchemaViolation};
pub use index::{Generation, Index, IndexWriter, SegmentEntry, WriterState};
pub use metrics::IndexMetrics;
pub use query::{ExistsQuery, FuzzyQuery, PrefixQuery, QueryNode, QueryPlan, WildcardQuery};
pub use schema::{
    FieldEntry, FieldId, FieldKind, FieldOptions, Schema, SchemaBuilder, Term, FAST, INDEXED,
    STORED, STRING, TEXT,
};
pub use search::{
    parse_aggregations, Aggregation, AggregationResult, AggregationResults, Aggregations,
    FacetCounts, IndexReader, ReloadPolicy, SearchHit, Searcher,
};
pub use segment::{DocAddress, DocId, SegmentId};
pub use tokenizer::{Analyzer, Language, Tokenize};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
