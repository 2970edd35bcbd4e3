//! Liveness mask of a segment
//!
//! The segment payload never changes; deletions live here instead. A
//! `LiveDocs` is shared between generations behind an `Arc` and replaced
//! wholesale when a commit adds deletions, so a searcher's view stays
//! fixed for its lifetime.

use std::io;
use std::sync::Arc;

use roaring::RoaringBitmap;

use super::types::DocId;

#[derive(Clone, Debug)]
pub struct LiveDocs {
    max_doc: u32,
    deleted: Arc<RoaringBitmap>,
}

impl LiveDocs {
    /// All `max_doc` documents alive
    pub fn new(max_doc: u32) -> Self {
        Self {
            max_doc,
            deleted: Arc::new(RoaringBitmap::new()),
        }
    }

    pub fn from_deleted(max_doc: u32, mut deleted: RoaringBitmap) -> Self {
        if max_doc < u32::MAX {
            deleted.remove_range(max_doc..);
        }
        Self {
            max_doc,
            deleted: Arc::new(deleted),
        }
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn is_alive(&self, doc: DocId) -> bool {
        doc < self.max_doc && !self.deleted.contains(doc)
    }

    pub fn num_deleted(&self) -> u32 {
        self.deleted.len() as u32
    }

    pub fn num_alive(&self) -> u32 {
        self.max_doc - self.num_deleted()
    }

    pub fn has_deletes(&self) -> bool {
        !self.deleted.is_empty()
    }

    pub fn delete_ratio(&self) -> f64 {
        if self.max_doc == 0 {
            return 0.0;
        }
        self.num_deleted() as f64 / self.max_doc as f64
    }

    pub fn deleted(&self) -> &RoaringBitmap {
        &self.deleted
    }

    /// Bitmap of every live doc
    pub fn alive_bitmap(&self) -> RoaringBitmap {
        let mut alive = RoaringBitmap::new();
        alive.insert_range(0..self.max_doc);
        alive -= self.deleted.as_ref();
        alive
    }

    /// Copy with `docs` additionally deleted, or `None` when nothing changes
    pub fn with_deletions(&self, docs: &RoaringBitmap) -> Option<LiveDocs> {
        let mut fresh = docs - self.deleted.as_ref();
        if self.max_doc < u32::MAX {
            fresh.remove_range(self.max_doc..);
        }
        if fresh.is_empty() {
            return None;
        }
        let mut deleted = self.deleted.as_ref().clone();
        deleted |= fresh;
        Some(LiveDocs {
            max_doc: self.max_doc,
            deleted: Arc::new(deleted),
        })
    }

    /// `[crc32 u32 LE][max_doc u32 LE][roaring bitmap]`
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let mut body = Vec::with_capacity(4 + self.deleted.serialized_size());
        body.extend_from_slice(&self.max_doc.to_le_bytes());
        self.deleted.serialize_into(&mut body)?;

        let mut out = Vec::with_capacity(body.len() + 4);
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < 8 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "deletes file too short",
            ));
        }
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&bytes[..4]);
        let body = &bytes[4..];
        if crc32fast::hash(body) != u32::from_le_bytes(crc) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "deletes checksum mismatch",
            ));
        }
        let mut max_doc = [0u8; 4];
        max_doc.copy_from_slice(&body[..4]);
        let deleted = RoaringBitmap::deserialize_from(&body[4..])?;
        Ok(Self::from_deleted(u32::from_le_bytes(max_doc), deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_write_deletions() {
        let live = LiveDocs::new(10);
        assert_eq!(live.num_alive(), 10);

        let docs: RoaringBitmap = [1u32, 3, 42].into_iter().collect();
        let next = live.with_deletions(&docs).unwrap();
        assert!(live.is_alive(1));
        assert!(!next.is_alive(1));
        assert!(!next.is_alive(42));
        assert_eq!(next.num_deleted(), 2);
        assert_eq!(next.num_alive(), 8);
        assert!((next.delete_ratio() - 0.2).abs() < 1e-9);

        assert!(next.with_deletions(&docs).is_none());
    }

    #[test]
    fn test_alive_bitmap() {
        let live = LiveDocs::from_deleted(4, [0u32, 2].into_iter().collect());
        let alive: Vec<u32> = live.alive_bitmap().iter().collect();
        assert_eq!(alive, vec![1, 3]);
    }

    #[test]
    fn test_serialize_checksum() {
        let live = LiveDocs::from_deleted(100, [5u32, 77].into_iter().collect());
        let mut bytes = live.serialize().unwrap();
        let back = LiveDocs::deserialize(&bytes).unwrap();
        assert_eq!(back.max_doc(), 100);
        assert_eq!(back.deleted(), live.deleted());

        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(LiveDocs::deserialize(&bytes).is_err());
    }
}
