//! Index reader: hands out searchers according to a reload policy

use arc_swap::ArcSwap;
use tracing::debug;

use super::searcher::Searcher;
use crate::index::{Generation, Index};

/// When an `IndexReader` picks up newly published generations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReloadPolicy {
    /// Only on an explicit `reload()`
    Manual,
    /// Every searcher sees the latest commit
    #[default]
    OnCommit,
}

pub struct IndexReader {
    index: Index,
    policy: ReloadPolicy,
    generation: ArcSwap<Generation>,
}

impl IndexReader {
    pub(crate) fn new(index: Index, policy: ReloadPolicy) -> Self {
        let generation = ArcSwap::new(index.current_generation());
        Self {
            index,
            policy,
            generation,
        }
    }

    pub fn policy(&self) -> ReloadPolicy {
        self.policy
    }

    /// A searcher on the generation this reader currently exposes
    pub fn searcher(&self) -> Searcher {
        if self.policy == ReloadPolicy::OnCommit {
            self.reload();
        }
        Searcher::new(self.index.clone(), self.generation.load_full())
    }

    /// Switch to the index's current generation
    pub fn reload(&self) {
        let current = self.index.current_generation();
        let previous = self.generation.swap(current.clone());
        if previous.id() != current.id() {
            debug!(from = previous.id(), to = current.id(), "Reader reloaded");
        }
    }

    /// Id of the generation searchers are bound to
    pub fn generation_id(&self) -> u64 {
        self.generation.load().id()
    }
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("policy", &self.policy)
            .field("generation", &self.generation_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::schema::{Schema, TEXT};

    fn index() -> Index {
        let mut builder = Schema::builder();
        builder.add_text_field("body", TEXT).unwrap();
        Index::create_in_ram(builder.freeze()).unwrap()
    }

    #[test]
    fn test_manual_reader_waits_for_reload() {
        let index = index();
        let reader = index.reader_with_policy(ReloadPolicy::Manual);
        let mut writer = index.writer().unwrap();
        writer.add_document(Document::new().with("body", "late")).unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.searcher().num_docs(), 0);
        reader.reload();
        assert_eq!(reader.searcher().num_docs(), 1);
    }

    #[test]
    fn test_on_commit_reader_follows_commits() {
        let index = index();
        let reader = index.reader();
        let mut writer = index.writer().unwrap();
        writer.add_document(Document::new().with("body", "now")).unwrap();
        writer.commit().unwrap();
        assert_eq!(reader.searcher().num_docs(), 1);
        assert_eq!(reader.generation_id(), index.current_generation().id());
    }
}
