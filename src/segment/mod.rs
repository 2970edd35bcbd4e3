//! Segments: immutable units of the inverted index
//!
//! # Architecture
//!
//! - `SegmentBuilder`: in-memory segment fed by the index writer
//! - `SegmentWriter`: serializes terms, fast columns and stored records
//! - `SegmentReader`: verified, immutable view of a segment's files
//! - `LiveDocs`: copy-on-write deletion mask, kept outside the payload
//! - `SegmentStore`: segment directories and deletes files on disk
//! - `CommitLog` / `IndexManifest`: the durable record of each generation
//! - `MergePolicy` / `MergeScheduler` / `SegmentMerger`: compaction

pub mod builder;
pub mod commit_log;
pub mod doc_store;
pub mod fast_fields;
pub mod live_docs;
pub mod manifest;
pub mod merge;
pub mod merger;
pub mod postings;
pub mod reader;
pub mod statistics;
pub mod store;
pub mod term_dict;
mod types;
pub mod writer;

pub use builder::SegmentBuilder;
pub use commit_log::CommitLog;
pub use fast_fields::{sortable_u64, FastColumn, FastFieldsReader};
pub use live_docs::LiveDocs;
pub use manifest::{IndexManifest, ManifestEntry};
pub use merge::{
    merge_policy_from_config, LogMergePolicy, MergeCandidate, MergePolicy, MergeReason,
    MergeScheduler, NoMergePolicy, SegmentStats, TieredMergePolicy,
};
pub use merger::{DocIdMapping, MergeInput, MergeOutput, SegmentMerger};
pub use postings::PostingIterator;
pub use reader::SegmentReader;
pub use statistics::{idf, tf_weight};
pub use store::SegmentStore;
pub use term_dict::TermDictionary;
pub use types::*;
pub use writer::{SegmentFiles, SegmentMeta};
