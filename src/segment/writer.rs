//! Segment writer: turns sorted terms, fast columns and stored records into
//! the files of one immutable segment.
//!
//! Both the in-memory builder (flush) and the merger produce segments
//! through this writer, so the two paths share one file format.

use std::collections::BTreeMap;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use super::postings::PostingsWriter;
use super::term_dict::TermDictionaryBuilder;
use super::types::{Posting, PostingListMeta, SegmentId};
use crate::error::{LoupeError, Result};

pub const TERMS_FILE: &str = "terms.fst";
pub const TERM_INFO_FILE: &str = "terms.info";
pub const POSTINGS_FILE: &str = "postings.bin";
pub const FAST_FIELDS_FILE: &str = "fast.bin";
pub const STORE_FILE: &str = "store.bin";

/// Every file a segment consists of
pub const SEGMENT_FILES: [&str; 5] = [
    TERMS_FILE,
    TERM_INFO_FILE,
    POSTINGS_FILE,
    FAST_FIELDS_FILE,
    STORE_FILE,
];

/// Length and crc32 of one segment file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksum {
    pub len: u64,
    pub crc32: u32,
}

impl FileChecksum {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len() as u64,
            crc32: crc32fast::hash(bytes),
        }
    }
}

/// Identity and integrity data of a segment, recorded in the manifest
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    pub num_docs: u32,
    pub num_terms: u64,
    pub files: BTreeMap<String, FileChecksum>,
}

impl SegmentMeta {
    /// Combined checksum over all files, in file-name order
    pub fn checksum(&self) -> u32 {
        let mut hasher = Hasher::new();
        for (name, file) in &self.files {
            hasher.update(name.as_bytes());
            hasher.update(&file.len.to_le_bytes());
            hasher.update(&file.crc32.to_le_bytes());
        }
        hasher.finalize()
    }

    pub fn size_bytes(&self) -> u64 {
        self.files.values().map(|f| f.len).sum()
    }
}

/// The serialized form of a segment
#[derive(Clone, Debug)]
pub struct SegmentFiles {
    pub meta: SegmentMeta,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl SegmentFiles {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    /// Move a file out, failing with `CorruptSegment` if it is absent
    pub fn take(&mut self, name: &str) -> Result<Vec<u8>> {
        self.files
            .remove(name)
            .ok_or_else(|| LoupeError::corrupt_segment(self.meta.id, format!("missing {}", name)))
    }

    /// Compare every file against the checksums in `meta`
    pub fn verify(&self) -> Result<()> {
        for name in SEGMENT_FILES {
            let expected = self.meta.files.get(name).ok_or_else(|| {
                LoupeError::corrupt_segment(self.meta.id, format!("no checksum for {}", name))
            })?;
            let bytes = self.get(name).ok_or_else(|| {
                LoupeError::corrupt_segment(self.meta.id, format!("missing {}", name))
            })?;
            if FileChecksum::of(bytes) != *expected {
                return Err(LoupeError::corrupt_segment(
                    self.meta.id,
                    format!("checksum mismatch in {}", name),
                ));
            }
        }
        Ok(())
    }
}

/// Streams a segment's terms in sorted order, then seals it
pub struct SegmentWriter {
    id: SegmentId,
    postings: PostingsWriter,
    terms: TermDictionaryBuilder,
    num_terms: u64,
}

impl SegmentWriter {
    pub fn new(id: SegmentId) -> Self {
        Self {
            id,
            postings: PostingsWriter::new(),
            terms: TermDictionaryBuilder::new(),
            num_terms: 0,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Write one posting list. Terms with no postings are skipped.
    pub fn write_term<I>(&mut self, key: Vec<u8>, postings: I) -> Option<PostingListMeta>
    where
        I: IntoIterator<Item = Posting>,
    {
        let mut postings = postings.into_iter().peekable();
        postings.peek()?;
        self.postings.start_posting_list();
        for posting in postings {
            self.postings.add_posting(posting);
        }
        let meta = self.postings.finish_posting_list();
        self.terms.add(key, meta);
        self.num_terms += 1;
        Some(meta)
    }

    /// Seal the segment with its fast columns and doc store
    pub fn finish(self, num_docs: u32, fast_fields: Vec<u8>, store: Vec<u8>) -> Result<SegmentFiles> {
        let dict = self
            .terms
            .build()
            .map_err(|e| LoupeError::Internal(format!("term dictionary build failed: {}", e)))?;

        let mut files = BTreeMap::new();
        files.insert(TERMS_FILE.to_string(), dict.fst_bytes().to_vec());
        files.insert(
            TERM_INFO_FILE.to_string(),
            bincode::serialize(dict.metadata())?,
        );
        files.insert(POSTINGS_FILE.to_string(), self.postings.into_data());
        files.insert(FAST_FIELDS_FILE.to_string(), fast_fields);
        files.insert(STORE_FILE.to_string(), store);

        let checksums = files
            .iter()
            .map(|(name, bytes)| (name.clone(), FileChecksum::of(bytes)))
            .collect();

        Ok(SegmentFiles {
            meta: SegmentMeta {
                id: self.id,
                num_docs,
                num_terms: self.num_terms,
                files: checksums,
            },
            files,
        })
    }
}
