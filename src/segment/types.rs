//! Core types for the segment-based index

use serde::{Deserialize, Serialize};
use std::fmt;

/// Segment identifier, allocated monotonically per index
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Name of the segment's directory in a persistent index
    pub fn dir_name(&self) -> String {
        format!("segment_{:08}", self.0)
    }

    /// Parse a segment directory name back into an id
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.strip_prefix("segment_")?.parse().ok().map(SegmentId)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.0)
    }
}

/// Dense document ordinal within a segment (0..num_docs)
pub type DocId = u32;

/// Sentinel returned by exhausted posting iterators
pub const TERMINATED: DocId = u32::MAX;

/// Location of a document inside one searcher's generation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocAddress {
    /// Position of the segment in the generation's ordered segment list
    pub segment_ord: u32,
    pub doc: DocId,
}

impl DocAddress {
    pub fn new(segment_ord: u32, doc: DocId) -> Self {
        Self { segment_ord, doc }
    }
}

/// A single posting entry within a posting list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: DocId,
    /// Term frequency in this document
    pub term_frequency: u32,
    /// Token positions, empty when positions were not requested
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn new(doc: DocId, term_frequency: u32) -> Self {
        Self {
            doc,
            term_frequency,
            positions: Vec::new(),
        }
    }

    pub fn with_positions(doc: DocId, positions: Vec<u32>) -> Self {
        Self {
            doc,
            term_frequency: positions.len() as u32,
            positions,
        }
    }
}

/// Number of postings per compressed block
pub const BLOCK_SIZE: usize = 128;

/// A block of postings waiting to be compressed
#[derive(Clone, Debug, Default)]
pub struct PostingBlock {
    pub docs: Vec<DocId>,
    pub term_frequencies: Vec<u32>,
    pub positions: Vec<Vec<u32>>,
    pub max_doc: DocId,
}

impl PostingBlock {
    pub fn new() -> Self {
        Self {
            docs: Vec::with_capacity(BLOCK_SIZE),
            term_frequencies: Vec::with_capacity(BLOCK_SIZE),
            positions: Vec::with_capacity(BLOCK_SIZE),
            max_doc: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.docs.len() >= BLOCK_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn push(&mut self, posting: Posting) {
        self.max_doc = self.max_doc.max(posting.doc);
        self.docs.push(posting.doc);
        self.term_frequencies.push(posting.term_frequency);
        self.positions.push(posting.positions);
    }
}

/// Location and statistics of one posting list
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingListMeta {
    /// Byte offset into the postings file
    pub offset: u64,
    /// Byte length of the posting list
    pub length: u64,
    /// Number of documents containing the term (deleted ones included)
    pub doc_frequency: u32,
    /// Sum of term frequencies
    pub total_term_frequency: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_dir_names() {
        let id = SegmentId::new(42);
        assert_eq!(id.dir_name(), "segment_00000042");
        assert_eq!(SegmentId::from_dir_name(&id.dir_name()), Some(id));
        assert_eq!(SegmentId::from_dir_name("commits.log"), None);
        assert_eq!(id.next(), SegmentId(43));
    }

    #[test]
    fn test_posting_block_tracks_max_doc() {
        let mut block = PostingBlock::new();
        block.push(Posting::new(3, 2));
        block.push(Posting::with_positions(9, vec![1, 4, 7]));
        assert_eq!(block.len(), 2);
        assert_eq!(block.max_doc, 9);
        assert_eq!(block.term_frequencies, vec![2, 3]);
        assert!(!block.is_full());
    }
}
