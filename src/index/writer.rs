//! The single index writer
//!
//! Documents are buffered in a [`SegmentBuilder`]; when the memory budget or
//! document limit is reached the buffer is flushed into a pending segment that
//! is written to the store but not yet visible. `commit` flushes what is
//! left, applies recorded deletes and publishes a new generation.
//!
//! Every operation is stamped with a monotonically increasing opstamp. A
//! delete affects committed documents and buffered documents whose opstamp is
//! smaller than its own.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use roaring::RoaringBitmap;
use tracing::{debug, info, warn};

use super::generation::{Generation, SegmentEntry};
use super::lock::WriterLease;
use super::merger::{next_merge_candidate, MergeWorker};
use super::Index;
use crate::config::WriterConfig;
use crate::document::{encode, Document, EncodedDocument};
use crate::error::{LoupeError, Result};
use crate::schema::Term;
use crate::segment::{LiveDocs, SegmentBuilder, SegmentId, SegmentReader};

/// Lifecycle of a writer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    /// Nothing buffered since opening or the last rollback
    Open,
    /// Documents or deletes are waiting for a commit
    Buffering,
    /// The buffer is being written out as a segment
    Flushing,
    /// The last operation was a successful commit
    Committed,
    Closed,
}

/// A flushed but unpublished segment
struct PendingSegment {
    reader: Arc<SegmentReader>,
    /// Opstamp of each document, by doc id
    opstamps: Vec<u64>,
}

#[derive(Clone, Debug)]
enum DeleteTarget {
    Term(Term),
    All,
}

#[derive(Clone, Debug)]
struct PendingDelete {
    target: DeleteTarget,
    opstamp: u64,
}

pub struct IndexWriter {
    index: Index,
    config: WriterConfig,
    lease: Option<WriterLease>,
    state: WriterState,
    builder: SegmentBuilder,
    pending: Vec<PendingSegment>,
    deletes: Vec<PendingDelete>,
    next_opstamp: u64,
    merger: Option<MergeWorker>,
}

impl IndexWriter {
    pub(crate) fn new(index: Index, config: WriterConfig, lease: WriterLease) -> Result<Self> {
        let merger = MergeWorker::spawn(index.clone())?;
        let next_opstamp = index.current_generation().opstamp();
        Ok(Self {
            builder: SegmentBuilder::new(index.schema().clone()),
            index,
            config,
            lease: Some(lease),
            state: WriterState::Open,
            pending: Vec::new(),
            deletes: Vec::new(),
            next_opstamp,
            merger: Some(merger),
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Documents buffered in memory, not counting flushed pending segments
    pub fn num_buffered_docs(&self) -> u32 {
        self.builder.num_docs()
    }

    /// Flushed segments waiting for the next commit
    pub fn num_pending_segments(&self) -> usize {
        self.pending.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Err(LoupeError::WriterClosed);
        }
        Ok(())
    }

    fn next_opstamp(&mut self) -> u64 {
        let opstamp = self.next_opstamp;
        self.next_opstamp += 1;
        opstamp
    }

    /// Validate and buffer a document; returns its opstamp
    pub fn add_document(&mut self, doc: Document) -> Result<u64> {
        self.ensure_open()?;
        let encoded = encode(self.index.schema(), &doc)?;
        self.add_encoded(encoded)
    }

    /// Buffer a batch. The whole batch is validated before any of it is
    /// buffered; returns the opstamp of the last document.
    pub fn add_documents<I>(&mut self, docs: I) -> Result<u64>
    where
        I: IntoIterator<Item = Document>,
    {
        self.ensure_open()?;
        let schema = self.index.schema().clone();
        let encoded = docs
            .into_iter()
            .map(|doc| encode(&schema, &doc))
            .collect::<Result<Vec<_>>>()?;
        let mut last = self.next_opstamp.saturating_sub(1);
        for doc in encoded {
            last = self.add_encoded(doc)?;
        }
        Ok(last)
    }

    /// Once a document is buffered the add has succeeded. A failed
    /// intermediate flush leaves it in the buffer; the next flush or the
    /// commit retries and reports the error.
    fn add_encoded(&mut self, doc: EncodedDocument) -> Result<u64> {
        let opstamp = self.next_opstamp();
        self.builder.add_document(opstamp, &doc)?;
        self.state = WriterState::Buffering;
        self.index.inner().metrics().documents_added.inc();

        if self.builder.mem_usage() >= self.config.memory_budget_bytes
            || self.builder.num_docs() as usize >= self.config.max_buffered_docs
        {
            if let Err(e) = self.flush_buffer() {
                warn!(error = %e, "Intermediate flush failed, keeping documents buffered");
            }
        }
        Ok(opstamp)
    }

    /// Delete every document containing `term` once the next commit lands
    pub fn delete_documents(&mut self, term: Term) -> Result<u64> {
        self.ensure_open()?;
        let opstamp = self.next_opstamp();
        debug!(?term, opstamp, "Delete recorded");
        self.deletes.push(PendingDelete {
            target: DeleteTarget::Term(term),
            opstamp,
        });
        self.state = WriterState::Buffering;
        Ok(opstamp)
    }

    /// Delete every document added before this call, committed or not
    pub fn delete_all_documents(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let opstamp = self.next_opstamp();
        self.deletes.push(PendingDelete {
            target: DeleteTarget::All,
            opstamp,
        });
        self.state = WriterState::Buffering;
        Ok(opstamp)
    }

    /// Write the in-memory buffer out as a pending segment
    fn flush_buffer(&mut self) -> Result<()> {
        if self.builder.is_empty() {
            return Ok(());
        }
        let inner = self.index.inner();
        self.state = WriterState::Flushing;
        let id = inner.allocate_segment();
        match self.write_buffer(id) {
            Ok(reader) => {
                debug!(segment = %id, docs = reader.num_docs(), "Flushed segment");
                let opstamps = self.builder.opstamps().to_vec();
                self.pending.push(PendingSegment { reader, opstamps });
                self.builder = SegmentBuilder::new(self.index.schema().clone());
                self.state = WriterState::Buffering;
                Ok(())
            }
            Err(e) => {
                warn!(segment = %id, error = %e, "Segment flush failed");
                inner.release_segments([id]);
                if let Err(cleanup) = inner.store().remove_segment(id) {
                    warn!(segment = %id, error = %cleanup, "Failed to remove partial segment");
                }
                self.state = WriterState::Buffering;
                Err(e)
            }
        }
    }

    fn write_buffer(&self, id: SegmentId) -> Result<Arc<SegmentReader>> {
        let files = self.builder.serialize(id)?;
        self.index.inner().store().write_segment(&files)?;
        Ok(Arc::new(SegmentReader::open(files)?))
    }

    /// Flush, apply deletes and publish a new generation.
    ///
    /// On error nothing is published and the writer keeps its buffered
    /// documents and deletes, so calling `commit` again is safe. Returns the
    /// id of the published generation.
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let start = Instant::now();
        self.flush_buffer()?;

        let commit_opstamp = self.next_opstamp;
        let inner = self.index.inner();
        let mut publisher = inner.publisher().lock();
        let current = inner.current_generation();
        let generation_id = current.id() + 1;
        let mut applied = 0u64;

        let result = (|| -> Result<Arc<Generation>> {
            let mut segments = Vec::with_capacity(current.segments().len() + self.pending.len());
            for entry in current.segments() {
                let mut doomed = RoaringBitmap::new();
                for delete in &self.deletes {
                    match &delete.target {
                        DeleteTarget::Term(term) => doomed |= entry.reader().docs_with_term(term)?,
                        DeleteTarget::All => {
                            doomed.insert_range(0..entry.num_docs());
                        }
                    }
                }
                segments.push(with_deletions(entry, &doomed, generation_id, &mut applied));
            }

            for pending in &self.pending {
                let reader = &pending.reader;
                let mut doomed = RoaringBitmap::new();
                for delete in &self.deletes {
                    let candidates = match &delete.target {
                        DeleteTarget::Term(term) => reader.docs_with_term(term)?,
                        DeleteTarget::All => (0..reader.num_docs()).collect(),
                    };
                    doomed.extend(
                        candidates
                            .iter()
                            .filter(|&doc| pending.opstamps[doc as usize] < delete.opstamp),
                    );
                }
                let entry = SegmentEntry::new(reader.clone(), LiveDocs::new(reader.num_docs()), None);
                segments.push(with_deletions(&entry, &doomed, generation_id, &mut applied));
            }

            segments.retain(|segment| segment.num_alive() > 0);
            let generation = Generation::new(generation_id, commit_opstamp, segments);
            inner.publish(&mut publisher, generation)
        })();
        drop(publisher);

        let published = match result {
            Ok(published) => published,
            Err(e) => {
                warn!(generation = generation_id, error = %e, "Commit failed, previous generation kept");
                self.state = WriterState::Buffering;
                return Err(e);
            }
        };

        let flushed: Vec<SegmentId> = self.pending.iter().map(|p| p.reader.id()).collect();
        self.pending.clear();
        self.deletes.clear();
        inner.release_segments(flushed);
        inner.collect_garbage(&HashSet::new());
        self.state = WriterState::Committed;

        inner
            .metrics()
            .record_commit(start.elapsed().as_secs_f64(), applied);
        info!(
            generation = published.id(),
            opstamp = commit_opstamp,
            segments = published.segments().len(),
            alive = published.num_alive(),
            deleted = applied,
            "Committed"
        );

        self.schedule_merges();
        Ok(published.id())
    }

    /// Drop everything buffered since the last commit
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let dropped_docs = self.builder.num_docs() as usize
            + self
                .pending
                .iter()
                .map(|p| p.reader.num_docs() as usize)
                .sum::<usize>();
        self.builder = SegmentBuilder::new(self.index.schema().clone());
        self.deletes.clear();
        self.discard_pending();
        self.state = WriterState::Open;
        self.index.inner().metrics().rollbacks.inc();
        info!(docs = dropped_docs, "Rolled back uncommitted changes");
        Ok(())
    }

    fn discard_pending(&mut self) {
        let inner = self.index.inner();
        for pending in self.pending.drain(..) {
            let id = pending.reader.id();
            inner.release_segments([id]);
            if let Err(e) = inner.store().remove_segment(id) {
                warn!(segment = %id, error = %e, "Failed to remove discarded segment");
            }
        }
    }

    /// Merge the given committed segments now, on the calling thread.
    ///
    /// Returns the merged segment's id, or `None` if no document survived.
    pub fn merge(&self, segment_ids: &[SegmentId]) -> Result<Option<SegmentId>> {
        self.ensure_open()?;
        let inner = self.index.inner();
        if !inner.scheduler().lock().try_start(segment_ids) {
            return Err(LoupeError::InvalidArgument(format!(
                "segments {:?} are already being merged",
                segment_ids
            )));
        }
        let result = inner.merge_segments(segment_ids);
        inner.scheduler().lock().complete_merge(segment_ids);
        result
    }

    /// Hand merges proposed by the policy to the background worker
    fn schedule_merges(&self) {
        let Some(merger) = &self.merger else {
            return;
        };
        while let Some(candidate) = next_merge_candidate(self.index.inner()) {
            debug!(segments = ?candidate.segment_ids, reason = ?candidate.reason, "Merge scheduled");
            merger.submit(candidate);
        }
    }

    /// Block until background merges are done; reports the first merge error
    pub fn wait_merging_threads(&self) -> Result<()> {
        match &self.merger {
            Some(merger) => merger.wait(),
            None => Ok(()),
        }
    }

    pub fn searchable_segment_ids(&self) -> Vec<SegmentId> {
        self.index.searchable_segment_ids()
    }

    pub fn num_segments(&self) -> usize {
        self.index.current_generation().segments().len()
    }

    /// Discard uncommitted changes, stop the merger and release the lock
    pub fn close(&mut self) -> Result<()> {
        if self.state == WriterState::Closed {
            return Ok(());
        }
        self.discard_pending();
        let merge_result = match self.merger.take() {
            Some(merger) => merger.shutdown(),
            None => Ok(()),
        };
        self.state = WriterState::Closed;
        self.lease = None;
        info!("Index writer closed");
        merge_result
    }
}

fn with_deletions(
    entry: &SegmentEntry,
    doomed: &RoaringBitmap,
    generation: u64,
    applied: &mut u64,
) -> SegmentEntry {
    match entry.live().with_deletions(doomed) {
        Some(live) => {
            *applied += (live.num_deleted() - entry.live().num_deleted()) as u64;
            SegmentEntry::new(entry.reader().clone(), live, Some(generation))
        }
        None => entry.clone(),
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Error while closing index writer");
        }
    }
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter")
            .field("state", &self.state)
            .field("buffered_docs", &self.builder.num_docs())
            .field("pending_segments", &self.pending.len())
            .field("pending_deletes", &self.deletes.len())
            .field("next_opstamp", &self.next_opstamp)
            .finish()
    }
}
