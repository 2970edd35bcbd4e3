//! Generations: immutable, point-in-time segment sets
//!
//! The registry holds the current generation behind an `ArcSwap` and a weak
//! reference to every generation it ever published. A generation stays
//! reachable (and its segments stay on disk) for as long as some searcher
//! holds it.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::segment::{
    IndexManifest, LiveDocs, ManifestEntry, SegmentId, SegmentReader, SegmentStats,
};

/// One segment as seen by a generation: the shared payload plus the
/// liveness mask that was current when the generation was published
#[derive(Clone, Debug)]
pub struct SegmentEntry {
    reader: Arc<SegmentReader>,
    live: LiveDocs,
    delete_generation: Option<u64>,
}

impl SegmentEntry {
    pub fn new(reader: Arc<SegmentReader>, live: LiveDocs, delete_generation: Option<u64>) -> Self {
        Self {
            reader,
            live,
            delete_generation,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.reader.id()
    }

    pub fn reader(&self) -> &Arc<SegmentReader> {
        &self.reader
    }

    pub fn live(&self) -> &LiveDocs {
        &self.live
    }

    /// Generation whose deletes file holds this mask, `None` without deletes
    pub fn delete_generation(&self) -> Option<u64> {
        self.delete_generation
    }

    pub fn num_docs(&self) -> u32 {
        self.reader.num_docs()
    }

    pub fn num_alive(&self) -> u32 {
        self.live.num_alive()
    }

    pub fn stats(&self) -> SegmentStats {
        SegmentStats {
            id: self.id(),
            num_docs: self.num_docs(),
            num_deleted: self.live.num_deleted(),
            size_bytes: self.reader.size_bytes(),
        }
    }

    fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            segment: self.reader.meta().clone(),
            num_deleted: self.live.num_deleted(),
            delete_generation: self.delete_generation,
        }
    }
}

/// A committed, immutable set of segments
#[derive(Debug)]
pub struct Generation {
    id: u64,
    opstamp: u64,
    segments: Vec<SegmentEntry>,
    num_alive: u64,
}

impl Generation {
    pub fn new(id: u64, opstamp: u64, segments: Vec<SegmentEntry>) -> Self {
        let num_alive = segments.iter().map(|s| s.num_alive() as u64).sum();
        Self {
            id,
            opstamp,
            segments,
            num_alive,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Every operation with a smaller opstamp is reflected here
    pub fn opstamp(&self) -> u64 {
        self.opstamp
    }

    pub fn segments(&self) -> &[SegmentEntry] {
        &self.segments
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(SegmentEntry::id).collect()
    }

    pub fn get(&self, id: SegmentId) -> Option<&SegmentEntry> {
        self.segments.iter().find(|s| s.id() == id)
    }

    /// Live documents across all segments
    pub fn num_alive(&self) -> u64 {
        self.num_alive
    }

    pub fn num_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.num_docs() as u64).sum()
    }

    pub fn stats(&self) -> Vec<SegmentStats> {
        self.segments.iter().map(SegmentEntry::stats).collect()
    }

    pub(crate) fn manifest(&self, next_segment_id: u64) -> IndexManifest {
        IndexManifest {
            version: IndexManifest::VERSION,
            generation: self.id,
            opstamp: self.opstamp,
            next_segment_id,
            segments: self.segments.iter().map(SegmentEntry::manifest_entry).collect(),
        }
    }
}

pub(crate) struct GenerationRegistry {
    current: ArcSwap<Generation>,
    retained: DashMap<u64, Weak<Generation>>,
}

impl GenerationRegistry {
    pub fn new(initial: Generation) -> Self {
        let initial = Arc::new(initial);
        let retained = DashMap::new();
        retained.insert(initial.id(), Arc::downgrade(&initial));
        Self {
            current: ArcSwap::new(initial),
            retained,
        }
    }

    pub fn current(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    /// Swap in a new current generation. Callers serialize publishes.
    pub fn publish(&self, generation: Generation) -> Arc<Generation> {
        let generation = Arc::new(generation);
        self.retained
            .insert(generation.id(), Arc::downgrade(&generation));
        self.current.store(generation.clone());
        self.retained.retain(|_, weak| weak.strong_count() > 0);
        generation
    }

    /// A generation that is current or still held by someone
    pub fn get(&self, id: u64) -> Option<Arc<Generation>> {
        let current = self.current();
        if current.id() == id {
            return Some(current);
        }
        self.retained.get(&id).and_then(|weak| weak.upgrade())
    }

    /// Segments referenced by any reachable generation
    pub fn retained_segment_ids(&self) -> HashSet<SegmentId> {
        let mut ids: HashSet<SegmentId> = self.current().segment_ids().into_iter().collect();
        for entry in self.retained.iter() {
            if let Some(generation) = entry.value().upgrade() {
                ids.extend(generation.segment_ids());
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{encode, Document};
    use crate::schema::{Schema, TEXT};
    use crate::segment::SegmentBuilder;

    fn entry(id: u64, docs: usize) -> SegmentEntry {
        let mut builder = Schema::builder();
        builder.add_text_field("body", TEXT).unwrap();
        let schema = builder.freeze();
        let mut segment = SegmentBuilder::new(schema.clone());
        for i in 0..docs {
            let doc = encode(&schema, &Document::new().with("body", "word")).unwrap();
            segment.add_document(i as u64, &doc).unwrap();
        }
        let reader = SegmentReader::open(segment.serialize(SegmentId::new(id)).unwrap()).unwrap();
        SegmentEntry::new(Arc::new(reader), LiveDocs::new(docs as u32), None)
    }

    #[test]
    fn test_generation_counts() {
        let mut first = entry(1, 3);
        first.live = first.live.with_deletions(&[0u32].into_iter().collect()).unwrap();
        let generation = Generation::new(4, 9, vec![first, entry(2, 2)]);
        assert_eq!(generation.num_alive(), 4);
        assert_eq!(generation.num_docs(), 5);
        assert_eq!(generation.segment_ids(), vec![SegmentId::new(1), SegmentId::new(2)]);

        let manifest = generation.manifest(3);
        assert_eq!(manifest.generation, 4);
        assert_eq!(manifest.opstamp, 9);
        assert_eq!(manifest.total_alive(), 4);
    }

    #[test]
    fn test_registry_retains_held_generations() {
        let registry = GenerationRegistry::new(Generation::new(0, 0, Vec::new()));
        let held = registry.publish(Generation::new(1, 1, vec![entry(1, 1)]));
        registry.publish(Generation::new(2, 2, vec![entry(2, 1)]));
        registry.publish(Generation::new(3, 3, vec![entry(3, 1)]));

        assert_eq!(registry.current().id(), 3);
        assert_eq!(registry.get(1).unwrap().id(), 1);
        // nobody holds generation 2 any more
        assert!(registry.get(2).is_none());

        let ids = registry.retained_segment_ids();
        assert!(ids.contains(&SegmentId::new(1)));
        assert!(ids.contains(&SegmentId::new(3)));
        assert!(!ids.contains(&SegmentId::new(2)));

        drop(held);
        assert!(registry.get(1).is_none());
        assert!(!registry.retained_segment_ids().contains(&SegmentId::new(1)));
    }
}
