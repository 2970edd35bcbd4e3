//! Term dictionary using FST (Finite State Transducer)
//!
//! Keys are serialized terms (field id + value bytes); the FST output is an
//! ordinal into a parallel array of posting list metadata.

use std::io;

use fst::{IntoStreamer, Map, MapBuilder, Streamer};

use super::types::PostingListMeta;

/// Immutable term dictionary backed by an FST
pub struct TermDictionary {
    fst: Map<Vec<u8>>,
    metadata: Vec<PostingListMeta>,
}

impl TermDictionary {
    /// Open a dictionary from FST bytes and its metadata array
    pub fn new(fst_data: Vec<u8>, metadata: Vec<PostingListMeta>) -> io::Result<Self> {
        let fst = Map::new(fst_data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if fst.len() != metadata.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "term dictionary has {} keys but {} metadata entries",
                    fst.len(),
                    metadata.len()
                ),
            ));
        }
        Ok(Self { fst, metadata })
    }

    /// Look up a term key
    pub fn get(&self, key: &[u8]) -> Option<&PostingListMeta> {
        self.fst
            .get(key)
            .and_then(|idx| self.metadata.get(idx as usize))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.fst.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// All terms whose key starts with `prefix`, in key order
    pub fn prefix_search(&self, prefix: &[u8]) -> Vec<(Vec<u8>, PostingListMeta)> {
        let mut results = Vec::new();
        self.visit_prefix(prefix, |key, meta| {
            results.push((key.to_vec(), *meta));
            true
        });
        results
    }

    /// Stream the terms starting with `prefix` in key order until `visit`
    /// returns false
    pub fn visit_prefix<F>(&self, prefix: &[u8], mut visit: F)
    where
        F: FnMut(&[u8], &PostingListMeta) -> bool,
    {
        let range = self.fst.range().ge(prefix);
        let mut stream = match prefix_upper_bound(prefix) {
            Some(upper) => range.lt(upper).into_stream(),
            None => range.into_stream(),
        };
        while let Some((key, idx)) = stream.next() {
            if let Some(meta) = self.metadata.get(idx as usize) {
                if !visit(key, meta) {
                    break;
                }
            }
        }
    }

    /// The raw FST map, for streaming unions during merges
    pub fn fst(&self) -> &Map<Vec<u8>> {
        &self.fst
    }

    /// Metadata for an FST output value
    pub fn meta_at(&self, ordinal: u64) -> Option<&PostingListMeta> {
        self.metadata.get(ordinal as usize)
    }

    pub fn fst_bytes(&self) -> &[u8] {
        self.fst.as_fst().as_bytes()
    }

    pub fn metadata(&self) -> &[PostingListMeta] {
        &self.metadata
    }
}

/// Smallest key greater than every key starting with `prefix`
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

/// Builder for term dictionaries
pub struct TermDictionaryBuilder {
    terms: Vec<(Vec<u8>, PostingListMeta)>,
}

impl TermDictionaryBuilder {
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            terms: Vec::with_capacity(capacity),
        }
    }

    /// Add a term key with its postings metadata
    pub fn add(&mut self, key: Vec<u8>, meta: PostingListMeta) {
        self.terms.push((key, meta));
    }

    /// Build the dictionary; keys are sorted, duplicates are rejected
    pub fn build(mut self) -> io::Result<TermDictionary> {
        self.terms.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fst_builder = MapBuilder::memory();
        let mut metadata = Vec::with_capacity(self.terms.len());

        for (idx, (key, meta)) in self.terms.into_iter().enumerate() {
            fst_builder
                .insert(&key, idx as u64)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            metadata.push(meta);
        }

        let fst_data = fst_builder
            .into_inner()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        TermDictionary::new(fst_data, metadata)
    }
}

impl Default for TermDictionaryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
