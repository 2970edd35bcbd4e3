//! Index manifest: the durable description of one committed generation
//!
//! A commit is the append of a manifest record to the commit log. The
//! manifest names every segment of the generation, in order, along with
//! which deletes file applies to it.

use serde::{Deserialize, Serialize};

use super::types::SegmentId;
use super::writer::SegmentMeta;
use crate::error::{LoupeError, Result};

/// One segment of a committed generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub segment: SegmentMeta,
    pub num_deleted: u32,
    /// Generation whose deletes file holds this segment's liveness mask
    pub delete_generation: Option<u64>,
}

impl ManifestEntry {
    pub fn new(segment: SegmentMeta) -> Self {
        Self {
            segment,
            num_deleted: 0,
            delete_generation: None,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.segment.id
    }

    pub fn num_alive(&self) -> u32 {
        self.segment.num_docs.saturating_sub(self.num_deleted)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub generation: u64,
    /// Opstamp of the commit that produced this generation
    pub opstamp: u64,
    pub next_segment_id: u64,
    pub segments: Vec<ManifestEntry>,
}

impl IndexManifest {
    /// Current manifest format version
    pub const VERSION: u32 = 1;

    /// Generation 0: no segments
    pub fn empty() -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            opstamp: 0,
            next_segment_id: 0,
            segments: Vec::new(),
        }
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(ManifestEntry::id).collect()
    }

    pub fn get(&self, id: SegmentId) -> Option<&ManifestEntry> {
        self.segments.iter().find(|e| e.id() == id)
    }

    pub fn total_docs(&self) -> u64 {
        self.segments.iter().map(|e| e.segment.num_docs as u64).sum()
    }

    pub fn total_alive(&self) -> u64 {
        self.segments.iter().map(|e| e.num_alive() as u64).sum()
    }

    pub fn to_bincode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bincode(data: &[u8]) -> Result<Self> {
        let manifest: IndexManifest = bincode::deserialize(data)?;
        if manifest.version != Self::VERSION {
            return Err(LoupeError::CorruptIndex(format!(
                "unsupported manifest version {}",
                manifest.version
            )));
        }
        Ok(manifest)
    }
}

impl Default for IndexManifest {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn meta(id: u64, num_docs: u32) -> SegmentMeta {
        SegmentMeta {
            id: SegmentId::new(id),
            num_docs,
            num_terms: 0,
            files: BTreeMap::new(),
        }
    }

    #[test]
    fn test_manifest_counts() {
        let mut manifest = IndexManifest::empty();
        manifest.segments.push(ManifestEntry::new(meta(1, 10)));
        manifest.segments.push(ManifestEntry {
            segment: meta(2, 5),
            num_deleted: 2,
            delete_generation: Some(3),
        });

        assert_eq!(manifest.total_docs(), 15);
        assert_eq!(manifest.total_alive(), 13);
        assert_eq!(manifest.segment_ids(), vec![SegmentId::new(1), SegmentId::new(2)]);
        assert!(manifest.get(SegmentId::new(2)).is_some());
        assert!(manifest.get(SegmentId::new(9)).is_none());
    }

    #[test]
    fn test_manifest_bincode() {
        let mut manifest = IndexManifest::empty();
        manifest.generation = 4;
        manifest.segments.push(ManifestEntry::new(meta(7, 1)));
        let bytes = manifest.to_bincode().unwrap();
        assert_eq!(IndexManifest::from_bincode(&bytes).unwrap(), manifest);

        manifest.version = 99;
        let bytes = manifest.to_bincode().unwrap();
        assert!(IndexManifest::from_bincode(&bytes).is_err());
    }
}
