//! The index: schema, segment store, generations and the writer lock
//!
//! Every change to the visible segment set (commit or merge) goes through
//! [`IndexInner::publish`] while holding the publisher mutex: deletes files
//! are written, the manifest is appended to the commit log, and only then
//! is the new generation swapped in.

mod generation;
mod lock;
mod merger;
mod writer;

pub use generation::{Generation, SegmentEntry};
pub use writer::{IndexWriter, WriterState};

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use tracing::{debug, info, warn};

use crate::config::{IndexSettings, WriterConfig};
use crate::error::{LoupeError, Result};
use crate::metrics::IndexMetrics;
use crate::schema::Schema;
use crate::search::{IndexReader, ReloadPolicy, Searcher};
use crate::segment::store::{SCHEMA_FILE, SETTINGS_FILE};
use crate::segment::{
    merge_policy_from_config, CommitLog, IndexManifest, LiveDocs, ManifestEntry, MergeInput,
    MergeOutput, MergePolicy, MergeScheduler, SegmentId, SegmentMerger, SegmentReader,
    SegmentStore,
};

use generation::GenerationRegistry;
use lock::WriterLock;

/// A handle on one index. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

pub(crate) struct IndexInner {
    schema: Schema,
    settings: IndexSettings,
    store: SegmentStore,
    generations: GenerationRegistry,
    writer_lock: Arc<WriterLock>,
    publisher: Mutex<Publisher>,
    next_segment_id: AtomicU64,
    /// Segments written but not yet published (pending flushes, running merges)
    in_flight: Mutex<HashSet<SegmentId>>,
    merge_policy: RwLock<Arc<dyn MergePolicy>>,
    scheduler: Mutex<MergeScheduler>,
    metrics: IndexMetrics,
}

pub(crate) struct Publisher {
    commit_log: Option<CommitLog>,
}

impl Index {
    /// Create a non-persistent index
    pub fn create_in_ram(schema: Schema) -> Result<Index> {
        Self::create_in_ram_with_settings(schema, IndexSettings::default())
    }

    pub fn create_in_ram_with_settings(schema: Schema, settings: IndexSettings) -> Result<Index> {
        settings.validate()?;
        let index = Self::assemble(
            schema,
            settings,
            SegmentStore::in_ram(),
            Generation::new(0, 0, Vec::new()),
            None,
            0,
        )?;
        info!("Created in-RAM index");
        Ok(index)
    }

    /// Create a persistent index in `path`; fails if one already exists there
    pub fn create_in_dir<P: AsRef<Path>>(path: P, schema: Schema) -> Result<Index> {
        Self::create_in_dir_with_settings(path, schema, IndexSettings::default())
    }

    pub fn create_in_dir_with_settings<P: AsRef<Path>>(
        path: P,
        schema: Schema,
        settings: IndexSettings,
    ) -> Result<Index> {
        settings.validate()?;
        let path = path.as_ref();
        let store = SegmentStore::open(path)?;
        if store.read_file(SCHEMA_FILE)?.is_some() {
            return Err(LoupeError::InvalidArgument(format!(
                "an index already exists at {}",
                path.display()
            )));
        }

        store.write_atomic(SETTINGS_FILE, serde_json::to_string_pretty(&settings)?.as_bytes())?;
        let log_path = commit_log_path(&store)?;
        let (mut commit_log, _) = CommitLog::open(log_path)?;
        commit_log.append(&IndexManifest::empty())?;
        // the schema is written last: its presence marks a complete index
        store.write_atomic(SCHEMA_FILE, schema.to_json()?.as_bytes())?;

        let index = Self::assemble(
            schema,
            settings,
            store,
            Generation::new(0, 0, Vec::new()),
            Some(commit_log),
            0,
        )?;
        info!(path = %path.display(), "Created index");
        Ok(index)
    }

    /// Open an existing index, refusing to serve it if any segment is corrupt
    pub fn open_in_dir<P: AsRef<Path>>(path: P) -> Result<Index> {
        Self::open(path.as_ref(), false)
    }

    /// Open an existing index, dropping corrupt segments from the served set
    pub fn open_in_dir_skip_corrupt<P: AsRef<Path>>(path: P) -> Result<Index> {
        Self::open(path.as_ref(), true)
    }

    /// Open the index in `path` if there is one, otherwise create it.
    ///
    /// An existing index must have been created with an equal schema.
    pub fn open_or_create<P: AsRef<Path>>(path: P, schema: Schema) -> Result<Index> {
        let path = path.as_ref();
        if !path.join(SCHEMA_FILE).exists() {
            return Self::create_in_dir(path, schema);
        }
        let index = Self::open_in_dir(path)?;
        if index.schema() != &schema {
            return Err(LoupeError::InvalidArgument(format!(
                "the index at {} was created with a different schema",
                path.display()
            )));
        }
        Ok(index)
    }

    fn open(path: &Path, skip_corrupt: bool) -> Result<Index> {
        if !path.join(SCHEMA_FILE).exists() {
            return Err(LoupeError::InvalidArgument(format!(
                "no index found at {}",
                path.display()
            )));
        }
        let store = SegmentStore::open(path)?;
        let schema_json = store
            .read_file(SCHEMA_FILE)?
            .ok_or_else(|| LoupeError::CorruptIndex("schema file vanished".to_string()))?;
        let schema = Schema::from_json(&String::from_utf8_lossy(&schema_json))?;
        let settings = match store.read_file(SETTINGS_FILE)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => IndexSettings::default(),
        };

        let (commit_log, manifest) = CommitLog::open(commit_log_path(&store)?)?;
        let manifest = manifest.ok_or_else(|| {
            LoupeError::CorruptIndex("commit log holds no valid record".to_string())
        })?;
        info!(
            path = %path.display(),
            generation = manifest.generation,
            segments = manifest.segments.len(),
            "Recovered index from commit log"
        );

        let mut segments = Vec::with_capacity(manifest.segments.len());
        for entry in &manifest.segments {
            match load_segment(&store, entry) {
                Ok(segment) => segments.push(segment),
                Err(e @ LoupeError::CorruptSegment { .. }) if skip_corrupt => {
                    warn!(segment = %entry.id(), error = %e, "Skipping corrupt segment");
                }
                Err(e) => {
                    if matches!(e, LoupeError::CorruptSegment { .. }) {
                        warn!(segment = %entry.id(), error = %e, "Corrupt segment detected");
                    }
                    return Err(e);
                }
            }
        }

        let on_disk = store.list_segments()?;
        let next_segment_id = on_disk
            .iter()
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(0)
            .max(manifest.next_segment_id);

        let generation = Generation::new(manifest.generation, manifest.opstamp, segments);
        let index = Self::assemble(
            schema,
            settings,
            store,
            generation,
            Some(commit_log),
            next_segment_id,
        )?;

        // another process may be writing; only clean up when nobody is
        match index.inner.writer_lock.acquire() {
            Ok(_lease) => {
                let keep: HashSet<SegmentId> = manifest.segment_ids().into_iter().collect();
                index.inner.collect_garbage(&keep);
            }
            Err(LoupeError::WriterBusy) => {
                debug!("Writer lock held elsewhere, skipping garbage collection on open")
            }
            Err(e) => return Err(e),
        }
        Ok(index)
    }

    fn assemble(
        schema: Schema,
        settings: IndexSettings,
        store: SegmentStore,
        generation: Generation,
        commit_log: Option<CommitLog>,
        next_segment_id: u64,
    ) -> Result<Index> {
        let metrics = IndexMetrics::new().map_err(|e| LoupeError::Internal(e.to_string()))?;
        metrics.set_generation_stats(generation.num_alive(), generation.segments().len());
        let merge_policy: Arc<dyn MergePolicy> =
            Arc::from(merge_policy_from_config(&settings.merge_policy));
        let writer_lock = Arc::new(WriterLock::new(store.lock_path()));

        Ok(Index {
            inner: Arc::new(IndexInner {
                schema,
                settings,
                store,
                generations: GenerationRegistry::new(generation),
                writer_lock,
                publisher: Mutex::new(Publisher { commit_log }),
                next_segment_id: AtomicU64::new(next_segment_id),
                in_flight: Mutex::new(HashSet::new()),
                merge_policy: RwLock::new(merge_policy),
                scheduler: Mutex::new(MergeScheduler::new(1)),
                metrics,
            }),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.inner.settings
    }

    /// Directory of a persistent index
    pub fn path(&self) -> Option<&Path> {
        self.inner.store.root()
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.inner.metrics
    }

    /// Open the single writer with the configured writer settings
    pub fn writer(&self) -> Result<IndexWriter> {
        self.writer_with_config(self.inner.settings.writer.clone())
    }

    /// Open the single writer; fails with `WriterBusy` while another is open
    pub fn writer_with_config(&self, config: WriterConfig) -> Result<IndexWriter> {
        let settings = IndexSettings {
            writer: config.clone(),
            ..self.inner.settings.clone()
        };
        settings.validate()?;
        let lease = self.inner.writer_lock.acquire()?;
        info!("Index writer opened");
        IndexWriter::new(self.clone(), config, lease)
    }

    /// A searcher bound to the current generation
    pub fn searcher(&self) -> Searcher {
        Searcher::new(self.clone(), self.current_generation())
    }

    /// A reader that reloads on commit
    pub fn reader(&self) -> IndexReader {
        self.reader_with_policy(ReloadPolicy::OnCommit)
    }

    pub fn reader_with_policy(&self, policy: ReloadPolicy) -> IndexReader {
        IndexReader::new(self.clone(), policy)
    }

    pub fn current_generation(&self) -> Arc<Generation> {
        self.inner.generations.current()
    }

    /// The ordered segment set of a generation that is current or still
    /// held by a searcher
    pub fn segments_for(&self, generation: u64) -> Option<Vec<SegmentEntry>> {
        self.inner
            .generations
            .get(generation)
            .map(|g| g.segments().to_vec())
    }

    pub fn searchable_segment_ids(&self) -> Vec<SegmentId> {
        self.current_generation().segment_ids()
    }

    pub fn set_merge_policy(&self, policy: Box<dyn MergePolicy>) {
        debug!(policy = ?policy, "Merge policy replaced");
        *self.inner.merge_policy.write() = Arc::from(policy);
    }

    pub fn merge_policy(&self) -> Arc<dyn MergePolicy> {
        self.inner.merge_policy.read().clone()
    }

    pub(crate) fn inner(&self) -> &IndexInner {
        &self.inner
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let generation = self.current_generation();
        f.debug_struct("Index")
            .field("path", &self.path())
            .field("generation", &generation.id())
            .field("segments", &generation.segments().len())
            .finish()
    }
}

fn commit_log_path(store: &SegmentStore) -> Result<std::path::PathBuf> {
    store
        .commit_log_path()
        .ok_or_else(|| LoupeError::Internal("in-RAM store has no commit log".to_string()))
}

fn load_segment(store: &SegmentStore, entry: &ManifestEntry) -> Result<SegmentEntry> {
    let reader = SegmentReader::open(store.read_segment(&entry.segment)?)?;
    let live = match entry.delete_generation {
        Some(generation) => store.read_deletes(entry.id(), generation)?,
        None => LiveDocs::new(reader.num_docs()),
    };
    if live.max_doc() != reader.num_docs() || live.num_deleted() != entry.num_deleted {
        return Err(LoupeError::corrupt_segment(
            entry.id(),
            format!(
                "deletes file covers {} docs with {} deleted, manifest says {} with {}",
                live.max_doc(),
                live.num_deleted(),
                reader.num_docs(),
                entry.num_deleted
            ),
        ));
    }
    debug!(segment = %entry.id(), docs = reader.num_docs(), "Loaded segment");
    Ok(SegmentEntry::new(Arc::new(reader), live, entry.delete_generation))
}

impl IndexInner {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    pub fn current_generation(&self) -> Arc<Generation> {
        self.generations.current()
    }

    pub fn merge_policy(&self) -> Arc<dyn MergePolicy> {
        self.merge_policy.read().clone()
    }

    pub fn scheduler(&self) -> &Mutex<MergeScheduler> {
        &self.scheduler
    }

    pub fn publisher(&self) -> &Mutex<Publisher> {
        &self.publisher
    }

    /// Reserve a fresh segment id and protect it from garbage collection
    pub fn allocate_segment(&self) -> SegmentId {
        let id = SegmentId::new(self.next_segment_id.fetch_add(1, Ordering::SeqCst));
        self.in_flight.lock().insert(id);
        id
    }

    pub fn release_segments(&self, ids: impl IntoIterator<Item = SegmentId>) {
        let mut in_flight = self.in_flight.lock();
        for id in ids {
            in_flight.remove(&id);
        }
    }

    /// Make `generation` durable and visible.
    ///
    /// Nothing becomes visible unless the commit log append succeeds; on
    /// error the previous generation stays current.
    pub fn publish(&self, publisher: &mut Publisher, generation: Generation) -> Result<Arc<Generation>> {
        for segment in generation.segments() {
            if segment.delete_generation() == Some(generation.id()) {
                self.store
                    .write_deletes(segment.id(), generation.id(), segment.live())?;
            }
        }
        if let Some(log) = publisher.commit_log.as_mut() {
            let manifest = generation.manifest(self.next_segment_id.load(Ordering::SeqCst));
            log.append(&manifest)?;
        }

        let published = self.generations.publish(generation);
        self.metrics
            .set_generation_stats(published.num_alive(), published.segments().len());
        self.scheduler
            .lock()
            .retain_pending(&published.segment_ids());
        debug!(
            generation = published.id(),
            segments = published.segments().len(),
            alive = published.num_alive(),
            "Published generation"
        );
        Ok(published)
    }

    /// Remove segment directories and deletes files nothing refers to.
    /// Failures are logged; the data they concern is unreachable anyway.
    pub fn collect_garbage(&self, keep: &HashSet<SegmentId>) {
        if !self.store.is_persistent() {
            return;
        }
        // Order matters: a directory exists only after its id was allocated,
        // and an id leaves `in_flight` only after its generation is
        // published. Listing, then in-flight, then retained never misses one.
        let on_disk = match self.store.list_segments() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list segment directories");
                return;
            }
        };
        let mut referenced: HashSet<SegmentId> = self.in_flight.lock().iter().copied().collect();
        referenced.extend(self.generations.retained_segment_ids());
        referenced.extend(keep.iter().copied());

        for id in on_disk {
            if referenced.contains(&id) {
                continue;
            }
            if let Err(e) = self.store.remove_segment(id) {
                warn!(segment = %id, error = %e, "Failed to remove unreferenced segment");
            }
        }
        for segment in self.generations.current().segments() {
            if let Err(e) = self
                .store
                .remove_stale_deletes(segment.id(), segment.delete_generation())
            {
                warn!(segment = %segment.id(), error = %e, "Failed to remove stale deletes files");
            }
        }
    }

    /// Merge committed segments into one and publish the result.
    ///
    /// Returns the new segment id, or `None` when every input document was
    /// deleted or an input disappeared from the index while merging.
    pub fn merge_segments(&self, ids: &[SegmentId]) -> Result<Option<SegmentId>> {
        if ids.is_empty() {
            return Err(LoupeError::InvalidArgument(
                "a merge needs at least one segment".to_string(),
            ));
        }
        let snapshot = self.generations.current();
        let mut inputs = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = snapshot.get(*id).ok_or_else(|| {
                LoupeError::InvalidArgument(format!("{} is not in the current generation", id))
            })?;
            inputs.push(MergeInput {
                reader: entry.reader().clone(),
                live: entry.live().clone(),
            });
        }

        let merged_id = self.allocate_segment();
        let result = self.run_merge(ids, inputs, merged_id);
        self.release_segments([merged_id]);
        match &result {
            Ok(Some(_)) => {}
            _ => {
                if let Err(e) = self.store.remove_segment(merged_id) {
                    warn!(segment = %merged_id, error = %e, "Failed to clean up merge output");
                }
            }
        }
        drop(snapshot);
        self.collect_garbage(&HashSet::new());
        result
    }

    fn run_merge(
        &self,
        ids: &[SegmentId],
        inputs: Vec<MergeInput>,
        merged_id: SegmentId,
    ) -> Result<Option<SegmentId>> {
        let start = Instant::now();
        let before: Vec<LiveDocs> = inputs.iter().map(|input| input.live.clone()).collect();
        info!(inputs = ?ids, target = %merged_id, "Merge started");

        let MergeOutput { files, doc_maps } =
            SegmentMerger::new(self.schema.clone(), inputs)?.write(merged_id)?;
        let num_docs = files.meta.num_docs;
        let reader = if num_docs > 0 {
            self.store.write_segment(&files)?;
            Some(Arc::new(SegmentReader::open(files)?))
        } else {
            None
        };

        let mut publisher = self.publisher.lock();
        let current = self.generations.current();

        // carry over deletes committed while the merge ran
        let mut carried = RoaringBitmap::new();
        for (idx, id) in ids.iter().enumerate() {
            let Some(entry) = current.get(*id) else {
                info!(segment = %id, "Merge abandoned: input segment no longer committed");
                return Ok(None);
            };
            let fresh = entry.live().deleted() - before[idx].deleted();
            carried.extend(fresh.iter().filter_map(|doc| doc_maps[idx].get(doc)));
        }

        let new_id = current.id() + 1;
        let mut merged = reader.map(|reader| {
            let fresh = LiveDocs::new(reader.num_docs());
            match fresh.with_deletions(&carried) {
                Some(live) => SegmentEntry::new(reader, live, Some(new_id)),
                None => SegmentEntry::new(reader, fresh, None),
            }
        });

        let mut segments = Vec::with_capacity(current.segments().len());
        for entry in current.segments() {
            if ids.contains(&entry.id()) {
                if let Some(m) = merged.take() {
                    segments.push(m);
                }
            } else {
                segments.push(entry.clone());
            }
        }
        let published = self.publish(
            &mut publisher,
            Generation::new(new_id, current.opstamp(), segments),
        )?;
        drop(publisher);

        self.metrics.merges.inc();
        info!(
            target = %merged_id,
            docs = num_docs,
            generation = published.id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Merge finished"
        );
        Ok(published.get(merged_id).map(|_| merged_id))
    }
}
