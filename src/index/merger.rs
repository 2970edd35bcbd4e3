//! Background merge worker
//!
//! One thread per writer receives merge candidates over a channel and runs
//! them off the write path. After each successful merge it asks the policy
//! again, so cascading merges happen without the writer having to commit.
//! A failed merge is reported once through `wait` and its inputs are not
//! proposed again.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::{Index, IndexInner};
use crate::error::{LoupeError, Result};
use crate::segment::MergeCandidate;

/// Ask the policy for work and reserve the best candidate in the scheduler
pub(crate) fn next_merge_candidate(inner: &IndexInner) -> Option<MergeCandidate> {
    let generation = inner.current_generation();
    let policy = inner.merge_policy();
    let mut scheduler = inner.scheduler().lock();
    let idle: Vec<_> = generation
        .stats()
        .into_iter()
        .filter(|stats| scheduler.is_eligible(stats.id))
        .collect();
    scheduler.add_candidates(policy.compute_merge_candidates(&idle));
    scheduler.next_merge()
}

#[derive(Default)]
struct Progress {
    outstanding: usize,
    errors: Vec<LoupeError>,
}

#[derive(Default)]
struct Shared {
    progress: Mutex<Progress>,
    idle: Condvar,
}

impl Shared {
    fn begin(&self) {
        self.progress.lock().outstanding += 1;
    }

    fn finish(&self, error: Option<LoupeError>) {
        let mut progress = self.progress.lock();
        progress.outstanding -= 1;
        if let Some(e) = error {
            progress.errors.push(e);
        }
        if progress.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Wait for all merges, then hand back the first recorded error
    fn wait(&self) -> Result<()> {
        let mut progress = self.progress.lock();
        while progress.outstanding > 0 {
            self.idle.wait(&mut progress);
        }
        let mut errors = std::mem::take(&mut progress.errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.swap_remove(0))
        }
    }
}

pub(crate) struct MergeWorker {
    sender: Option<Sender<MergeCandidate>>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl MergeWorker {
    pub fn spawn(index: Index) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<MergeCandidate>();
        let shared = Arc::new(Shared::default());
        let worker_shared = shared.clone();

        let handle = thread::Builder::new()
            .name("loupe-merger".to_string())
            .spawn(move || {
                for candidate in receiver.iter() {
                    let mut current = candidate;
                    loop {
                        let error = run(&index, &current);
                        // reserve the follow-up before reporting, so waiters
                        // never observe an idle gap inside a cascade
                        let next = match error {
                            Some(_) => None,
                            None => next_merge_candidate(index.inner()),
                        };
                        if next.is_some() {
                            worker_shared.begin();
                        }
                        worker_shared.finish(error);
                        match next {
                            Some(next) => current = next,
                            None => break,
                        }
                    }
                }
                debug!("Merge worker stopped");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            shared,
        })
    }

    /// Queue a candidate already reserved in the scheduler
    pub fn submit(&self, candidate: MergeCandidate) {
        self.shared.begin();
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(err) = sender.send(candidate) {
            let candidate = err.into_inner();
            warn!(segments = ?candidate.segment_ids, "Merge worker is gone, dropping merge");
            self.shared.finish(None);
        }
    }

    pub fn wait(&self) -> Result<()> {
        self.shared.wait()
    }

    /// Finish queued merges and join the thread
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        drop(sender);
        let result = self.shared.wait();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(LoupeError::Internal("merge worker panicked".to_string()));
            }
        }
        result
    }
}

impl Drop for MergeWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Merge worker stopped with an error");
        }
    }
}

fn run(index: &Index, candidate: &MergeCandidate) -> Option<LoupeError> {
    let inner = index.inner();
    debug!(segments = ?candidate.segment_ids, reason = ?candidate.reason, "Running merge");
    match inner.merge_segments(&candidate.segment_ids) {
        Ok(_) => {
            inner.scheduler().lock().complete_merge(&candidate.segment_ids);
            None
        }
        Err(e) => {
            warn!(segments = ?candidate.segment_ids, error = %e, "Background merge failed");
            inner.scheduler().lock().fail_merge(&candidate.segment_ids);
            Some(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexSettings, MergePolicyConfig};
    use crate::document::Document;
    use crate::schema::{Schema, STORED, TEXT};

    fn index_with_policy(policy: MergePolicyConfig) -> Index {
        let mut builder = Schema::builder();
        builder.add_text_field("body", TEXT | STORED).unwrap();
        let settings = IndexSettings {
            merge_policy: policy,
            ..Default::default()
        };
        Index::create_in_ram_with_settings(builder.freeze(), settings).unwrap()
    }

    #[test]
    fn test_no_merge_policy_proposes_nothing() {
        let index = index_with_policy(MergePolicyConfig::NoMerge);
        let mut writer = index.writer().unwrap();
        for _ in 0..4 {
            writer.add_document(Document::new().with("body", "x")).unwrap();
            writer.commit().unwrap();
        }
        assert!(next_merge_candidate(index.inner()).is_none());
        writer.wait_merging_threads().unwrap();
        assert_eq!(writer.num_segments(), 4);
    }

    #[test]
    fn test_background_merges_keep_every_document() {
        let index = index_with_policy(MergePolicyConfig::Log {
            min_num_segments: 2,
            max_docs_before_merge: 1_000,
            del_docs_ratio_before_merge: 1.0,
            level_log_size: 0.75,
            min_layer_size: 10,
        });
        let mut writer = index.writer().unwrap();
        for i in 0..6 {
            writer
                .add_document(Document::new().with("body", format!("doc {}", i)))
                .unwrap();
            writer.commit().unwrap();
        }
        writer.wait_merging_threads().unwrap();

        let generation = index.current_generation();
        assert_eq!(generation.num_alive(), 6);
        assert!(generation.segments().len() < 6);
    }
}
