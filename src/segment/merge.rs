//! Merge policies and scheduler
//!
//! A policy looks at the committed segments and proposes groups to merge;
//! the scheduler makes sure no segment takes part in two merges at once.

use std::collections::HashSet;
use std::fmt;

use super::types::SegmentId;
use crate::config::MergePolicyConfig;

/// What a merge policy sees of a segment
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentStats {
    pub id: SegmentId,
    pub num_docs: u32,
    pub num_deleted: u32,
    pub size_bytes: u64,
}

impl SegmentStats {
    pub fn num_alive(&self) -> u32 {
        self.num_docs.saturating_sub(self.num_deleted)
    }

    pub fn delete_ratio(&self) -> f64 {
        if self.num_docs == 0 {
            0.0
        } else {
            self.num_deleted as f64 / self.num_docs as f64
        }
    }
}

/// A candidate merge operation
#[derive(Clone, Debug, PartialEq)]
pub struct MergeCandidate {
    /// Segment IDs to merge, in generation order
    pub segment_ids: Vec<SegmentId>,
    /// Merge score (higher = more urgent)
    pub score: f64,
    pub reason: MergeReason,
}

/// Reason why segments should be merged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeReason {
    /// Too many segments of similar size
    LevelOverflow,
    /// Too many segments in a tier
    TierOverflow,
    /// High delete ratio
    HighDeleteRatio,
    /// Requested explicitly through the writer
    Forced,
}

pub trait MergePolicy: Send + Sync + fmt::Debug {
    fn compute_merge_candidates(&self, segments: &[SegmentStats]) -> Vec<MergeCandidate>;
}

/// Build the policy described by `config`
pub fn merge_policy_from_config(config: &MergePolicyConfig) -> Box<dyn MergePolicy> {
    match config {
        MergePolicyConfig::NoMerge => Box::new(NoMergePolicy),
        MergePolicyConfig::Log {
            min_num_segments,
            max_docs_before_merge,
            del_docs_ratio_before_merge,
            level_log_size,
            min_layer_size,
        } => Box::new(LogMergePolicy {
            min_num_segments: *min_num_segments,
            max_docs_before_merge: *max_docs_before_merge,
            del_docs_ratio_before_merge: *del_docs_ratio_before_merge,
            level_log_size: *level_log_size,
            min_layer_size: *min_layer_size,
        }),
        MergePolicyConfig::Tiered {
            segments_per_tier,
            max_merge_count,
            floor_docs,
            delete_ratio_threshold,
        } => Box::new(TieredMergePolicy {
            segments_per_tier: *segments_per_tier,
            max_merge_count: *max_merge_count,
            floor_docs: *floor_docs,
            delete_ratio_threshold: *delete_ratio_threshold,
        }),
    }
}

/// Keep segments in generation order inside a candidate
fn in_generation_order(segments: &[SegmentStats], mut ids: Vec<SegmentId>) -> Vec<SegmentId> {
    ids.sort_by_key(|id| segments.iter().position(|s| s.id == *id));
    ids
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn compute_merge_candidates(&self, _segments: &[SegmentStats]) -> Vec<MergeCandidate> {
        Vec::new()
    }
}

/// Groups segments into levels of similar log-size and merges a level once
/// it holds `min_num_segments` segments
#[derive(Clone, Debug)]
pub struct LogMergePolicy {
    pub min_num_segments: usize,
    pub max_docs_before_merge: u32,
    pub del_docs_ratio_before_merge: f64,
    pub level_log_size: f64,
    pub min_layer_size: u32,
}

impl Default for LogMergePolicy {
    fn default() -> Self {
        Self {
            min_num_segments: 8,
            max_docs_before_merge: 10_000_000,
            del_docs_ratio_before_merge: 1.0,
            level_log_size: 0.75,
            min_layer_size: 10_000,
        }
    }
}

impl LogMergePolicy {
    fn clipped_log_size(&self, num_docs: u32) -> f64 {
        (num_docs.max(self.min_layer_size).max(1) as f64).log2()
    }
}

impl MergePolicy for LogMergePolicy {
    fn compute_merge_candidates(&self, segments: &[SegmentStats]) -> Vec<MergeCandidate> {
        let mut eligible: Vec<&SegmentStats> = segments
            .iter()
            .filter(|s| s.num_alive() <= self.max_docs_before_merge)
            .collect();
        eligible.sort_by(|a, b| b.num_alive().cmp(&a.num_alive()));

        let mut candidates = Vec::new();
        let mut level: Vec<&SegmentStats> = Vec::new();
        let mut level_top = f64::MAX;

        let flush = |level: &mut Vec<&SegmentStats>, candidates: &mut Vec<MergeCandidate>| {
            if level.len() >= self.min_num_segments.max(2) {
                let ids = level.iter().map(|s| s.id).collect();
                candidates.push(MergeCandidate {
                    segment_ids: in_generation_order(segments, ids),
                    score: level.len() as f64,
                    reason: MergeReason::LevelOverflow,
                });
            }
            level.clear();
        };

        for segment in eligible {
            let log_size = self.clipped_log_size(segment.num_alive());
            if level.is_empty() || log_size < level_top - self.level_log_size {
                flush(&mut level, &mut candidates);
                level_top = log_size;
            }
            level.push(segment);
        }
        flush(&mut level, &mut candidates);

        // Segments drowning in deletes are rewritten on their own
        let merged: Vec<SegmentId> = candidates
            .iter()
            .flat_map(|c| c.segment_ids.iter().copied())
            .collect();
        for segment in segments {
            if segment.num_deleted > 0
                && segment.delete_ratio() >= self.del_docs_ratio_before_merge
                && !merged.contains(&segment.id)
            {
                candidates.push(MergeCandidate {
                    segment_ids: vec![segment.id],
                    score: segment.delete_ratio() * 100.0,
                    reason: MergeReason::HighDeleteRatio,
                });
            }
        }
        candidates
    }
}

/// Tiered merge policy by live document count
#[derive(Clone, Debug)]
pub struct TieredMergePolicy {
    pub segments_per_tier: usize,
    pub max_merge_count: usize,
    pub floor_docs: u32,
    pub delete_ratio_threshold: f64,
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        Self {
            segments_per_tier: 10,
            max_merge_count: 10,
            floor_docs: 1_000,
            delete_ratio_threshold: 0.15,
        }
    }
}

impl TieredMergePolicy {
    const MAX_TIER: usize = 10;

    /// Calculate which tier a segment belongs to based on size
    fn size_to_tier(&self, num_docs: u32) -> usize {
        let floor = self.floor_docs.max(1) as u64;
        let ratio = self.segments_per_tier.max(2) as u64;
        let size = (num_docs as u64).max(floor);

        let mut tier_max = floor * ratio;
        let mut tier = 0;
        while size > tier_max && tier < Self::MAX_TIER - 1 {
            tier += 1;
            tier_max = tier_max.saturating_mul(ratio);
        }
        tier
    }

    fn find_high_delete_merge(&self, segments: &[SegmentStats]) -> Option<MergeCandidate> {
        let high_delete: Vec<&SegmentStats> = segments
            .iter()
            .filter(|s| s.num_deleted > 0 && s.delete_ratio() > self.delete_ratio_threshold)
            .take(self.max_merge_count.max(1))
            .collect();
        if high_delete.is_empty() {
            return None;
        }
        let avg_delete_ratio = high_delete.iter().map(|s| s.delete_ratio()).sum::<f64>()
            / high_delete.len() as f64;
        Some(MergeCandidate {
            segment_ids: high_delete.iter().map(|s| s.id).collect(),
            score: avg_delete_ratio * 100.0,
            reason: MergeReason::HighDeleteRatio,
        })
    }
}

impl MergePolicy for TieredMergePolicy {
    fn compute_merge_candidates(&self, segments: &[SegmentStats]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();
        let high_delete = self.find_high_delete_merge(segments);
        let taken: Vec<SegmentId> = high_delete
            .as_ref()
            .map(|c| c.segment_ids.clone())
            .unwrap_or_default();
        candidates.extend(high_delete);

        let mut tiers: Vec<Vec<&SegmentStats>> = vec![Vec::new(); Self::MAX_TIER];
        for segment in segments.iter().filter(|s| !taken.contains(&s.id)) {
            tiers[self.size_to_tier(segment.num_alive())].push(segment);
        }

        for (tier_idx, mut tier) in tiers.into_iter().enumerate() {
            if tier.len() <= self.segments_per_tier {
                continue;
            }
            let merge_count = (tier.len() - self.segments_per_tier + 1)
                .min(self.max_merge_count)
                .max(2);
            tier.sort_by_key(|s| s.num_alive());
            let ids = tier.iter().take(merge_count).map(|s| s.id).collect();

            // Lower tiers are cheaper and more urgent
            let score = (Self::MAX_TIER as f64 - tier_idx as f64).max(1.0) * merge_count as f64;
            candidates.push(MergeCandidate {
                segment_ids: in_generation_order(segments, ids),
                score,
                reason: MergeReason::TierOverflow,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }
}

/// Tracks pending and running merges
#[derive(Debug)]
pub struct MergeScheduler {
    pending: Vec<MergeCandidate>,
    /// Segment IDs being merged, one entry per running merge
    running: Vec<Vec<SegmentId>>,
    /// Inputs of failed background merges; never proposed again
    failed: HashSet<SegmentId>,
    max_concurrent: usize,
}

impl MergeScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            pending: Vec::new(),
            running: Vec::new(),
            failed: HashSet::new(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    fn overlaps_running(&self, ids: &[SegmentId]) -> bool {
        self.running
            .iter()
            .any(|running| ids.iter().any(|id| running.contains(id)))
    }

    /// Queue candidates, dropping any that touch a running merge
    pub fn add_candidates(&mut self, candidates: Vec<MergeCandidate>) {
        for candidate in candidates {
            let duplicate = self
                .pending
                .iter()
                .any(|p| p.segment_ids == candidate.segment_ids);
            if !duplicate && !self.overlaps_running(&candidate.segment_ids) {
                self.pending.push(candidate);
            }
        }
        self.pending.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Get the next merge to execute, marking it running
    pub fn next_merge(&mut self) -> Option<MergeCandidate> {
        if self.running.len() >= self.max_concurrent {
            return None;
        }
        let idx = self
            .pending
            .iter()
            .position(|candidate| !self.overlaps_running(&candidate.segment_ids))?;
        let candidate = self.pending.remove(idx);
        self.running.push(candidate.segment_ids.clone());
        Some(candidate)
    }

    /// Reserve segments for an explicit merge, bypassing the queue
    pub fn try_start(&mut self, ids: &[SegmentId]) -> bool {
        if self.overlaps_running(ids) {
            return false;
        }
        self.pending
            .retain(|p| !p.segment_ids.iter().any(|id| ids.contains(id)));
        self.running.push(ids.to_vec());
        true
    }

    /// Mark a merge as complete
    pub fn complete_merge(&mut self, segment_ids: &[SegmentId]) {
        self.running.retain(|running| running != segment_ids);
    }

    /// Mark a merge as finished with an error. Its inputs are excluded
    /// from later candidates until they leave the index.
    pub fn fail_merge(&mut self, segment_ids: &[SegmentId]) {
        self.complete_merge(segment_ids);
        self.failed.extend(segment_ids.iter().copied());
        self.pending
            .retain(|p| !p.segment_ids.iter().any(|id| segment_ids.contains(id)));
    }

    /// Forget queued merges and failures that mention segments no longer committed
    pub fn retain_pending(&mut self, live: &[SegmentId]) {
        self.pending
            .retain(|c| c.segment_ids.iter().all(|id| live.contains(id)));
        self.failed.retain(|id| live.contains(id));
    }

    pub fn is_merging(&self, id: SegmentId) -> bool {
        self.running.iter().any(|running| running.contains(&id))
    }

    /// Whether the segment may take part in a policy-proposed merge
    pub fn is_eligible(&self, id: SegmentId) -> bool {
        !self.is_merging(id) && !self.failed.contains(&id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }
}

impl Default for MergeScheduler {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(id: u64, num_docs: u32, num_deleted: u32) -> SegmentStats {
        SegmentStats {
            id: SegmentId::new(id),
            num_docs,
            num_deleted,
            size_bytes: num_docs as u64 * 100,
        }
    }

    #[test]
    fn test_no_merge_policy() {
        let segments: Vec<_> = (0..50).map(|i| stats(i, 10, 0)).collect();
        assert!(NoMergePolicy.compute_merge_candidates(&segments).is_empty());
    }

    #[test]
    fn test_log_policy_merges_full_level() {
        let policy = LogMergePolicy {
            min_num_segments: 3,
            ..LogMergePolicy::default()
        };
        let segments = vec![stats(1, 10, 0), stats(2, 20, 0)];
        assert!(policy.compute_merge_candidates(&segments).is_empty());

        let segments = vec![stats(1, 10, 0), stats(2, 20, 0), stats(3, 15, 0)];
        let candidates = policy.compute_merge_candidates(&segments);
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].segment_ids,
            vec![SegmentId::new(1), SegmentId::new(2), SegmentId::new(3)]
        );
        assert_eq!(candidates[0].reason, MergeReason::LevelOverflow);
    }

    #[test]
    fn test_log_policy_separates_levels() {
        let policy = LogMergePolicy {
            min_num_segments: 2,
            min_layer_size: 1,
            ..LogMergePolicy::default()
        };
        let segments = vec![stats(1, 100_000, 0), stats(2, 10, 0), stats(3, 12, 0)];
        let candidates = policy.compute_merge_candidates(&segments);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].segment_ids, vec![SegmentId::new(2), SegmentId::new(3)]);
    }

    #[test]
    fn test_log_policy_delete_ratio() {
        let policy = LogMergePolicy {
            del_docs_ratio_before_merge: 0.5,
            ..LogMergePolicy::default()
        };
        let candidates = policy.compute_merge_candidates(&[stats(1, 10, 6), stats(2, 10, 1)]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].segment_ids, vec![SegmentId::new(1)]);
        assert_eq!(candidates[0].reason, MergeReason::HighDeleteRatio);
    }

    #[test]
    fn test_tiered_policy_overflow() {
        let policy = TieredMergePolicy {
            segments_per_tier: 3,
            max_merge_count: 10,
            floor_docs: 100,
            delete_ratio_threshold: 0.5,
        };
        let segments: Vec<_> = (0..5).map(|i| stats(i, 50 + i as u32, 0)).collect();
        let candidates = policy.compute_merge_candidates(&segments);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reason, MergeReason::TierOverflow);
        assert_eq!(candidates[0].segment_ids.len(), 3);
        assert_eq!(candidates[0].segment_ids[0], SegmentId::new(0));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = merge_policy_from_config(&MergePolicyConfig::NoMerge);
        assert!(policy.compute_merge_candidates(&[stats(1, 1, 0)]).is_empty());
        let policy = merge_policy_from_config(&MergePolicyConfig::tiered());
        assert!(format!("{:?}", policy).contains("Tiered"));
    }

    #[test]
    fn test_scheduler_prevents_overlap() {
        let mut scheduler = MergeScheduler::new(4);
        let a = MergeCandidate {
            segment_ids: vec![SegmentId::new(1), SegmentId::new(2)],
            score: 1.0,
            reason: MergeReason::LevelOverflow,
        };
        let b = MergeCandidate {
            segment_ids: vec![SegmentId::new(2), SegmentId::new(3)],
            score: 5.0,
            reason: MergeReason::LevelOverflow,
        };
        scheduler.add_candidates(vec![a.clone(), b.clone()]);

        let first = scheduler.next_merge().unwrap();
        assert_eq!(first, b);
        assert!(scheduler.is_merging(SegmentId::new(3)));
        assert!(scheduler.next_merge().is_none());
        assert!(!scheduler.try_start(&[SegmentId::new(2)]));

        scheduler.complete_merge(&first.segment_ids);
        assert_eq!(scheduler.next_merge().unwrap(), a);
        assert_eq!(scheduler.running_count(), 1);
    }

    #[test]
    fn test_scheduler_excludes_failed_inputs() {
        let mut scheduler = MergeScheduler::new(1);
        let ids = vec![SegmentId::new(1), SegmentId::new(2)];
        assert!(scheduler.try_start(&ids));
        scheduler.fail_merge(&ids);
        assert_eq!(scheduler.running_count(), 0);
        assert!(!scheduler.is_eligible(SegmentId::new(1)));
        assert!(scheduler.is_eligible(SegmentId::new(3)));

        // once the segment leaves the index the failure is forgotten
        scheduler.retain_pending(&[SegmentId::new(2), SegmentId::new(3)]);
        assert!(!scheduler.is_eligible(SegmentId::new(2)));
        scheduler.retain_pending(&[SegmentId::new(3)]);
        assert!(scheduler.failed.is_empty());
    }
}
