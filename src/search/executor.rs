//! Plan execution across the segments of a generation
//!
//! Each segment opens a streaming scorer; hits are pushed into a
//! bounded min-heap as the cursor advances, so only the best `limit`
//! survive and no match list is built. Ties on score go to
//! the smaller global ordinal (segment base + doc id), which makes result
//! order fully deterministic for a given generation.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::error::Result;
use crate::index::{Generation, SegmentEntry};
use crate::query::{QueryContext, QueryPlan, Scorer};
use crate::schema::Schema;
use crate::segment::{DocAddress, TERMINATED};

/// One search result
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub address: DocAddress,
    /// Position of the document across the whole generation
    pub global_ordinal: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Ranked {
    score: OrderedFloat<f32>,
    ordinal: u64,
    address: DocAddress,
}

/// Greater is better: higher score, then lower ordinal
impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.ordinal.cmp(&self.ordinal))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Keeps the best `limit` hits seen so far
pub(crate) struct TopDocs {
    limit: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl TopDocs {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(1024) + 1),
        }
    }

    pub fn push(&mut self, score: f32, ordinal: u64, address: DocAddress) {
        if self.limit == 0 {
            return;
        }
        let entry = Ranked {
            score: OrderedFloat(score),
            ordinal,
            address,
        };
        if self.heap.len() < self.limit {
            self.heap.push(Reverse(entry));
        } else if let Some(worst) = self.heap.peek() {
            if entry > worst.0 {
                self.heap.pop();
                self.heap.push(Reverse(entry));
            }
        }
    }

    /// Hits, best first
    pub fn into_hits(self) -> Vec<SearchHit> {
        let mut ranked: Vec<Ranked> = self.heap.into_iter().map(|Reverse(r)| r).collect();
        ranked.sort_by(|a, b| b.cmp(a));
        ranked
            .into_iter()
            .map(|r| SearchHit {
                score: r.score.0,
                address: r.address,
                global_ordinal: r.ordinal,
            })
            .collect()
    }
}

/// Run `visit` with the scorer of every segment, in segment order
pub(crate) fn for_each_segment<F>(
    plan: &QueryPlan,
    schema: &Schema,
    generation: &Generation,
    tf_saturation_k: f32,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(u32, u64, &SegmentEntry, &mut dyn Scorer) -> Result<()>,
{
    let num_alive = generation.num_alive();
    let mut base = 0u64;
    for (ord, segment) in generation.segments().iter().enumerate() {
        let ctx = QueryContext::new(schema, segment, num_alive, tf_saturation_k);
        let mut scorer = plan.scorer(&ctx)?;
        visit(ord as u32, base, segment, scorer.as_mut())?;
        base += segment.num_docs() as u64;
    }
    Ok(())
}

pub(crate) fn top_docs(
    plan: &QueryPlan,
    schema: &Schema,
    generation: &Generation,
    tf_saturation_k: f32,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let mut collector = TopDocs::new(limit);
    if limit == 0 {
        return Ok(Vec::new());
    }
    for_each_segment(plan, schema, generation, tf_saturation_k, |ord, base, _, scorer| {
        let mut doc = scorer.doc();
        while doc != TERMINATED {
            collector.push(scorer.score(), base + doc as u64, DocAddress::new(ord, doc));
            doc = scorer.advance()?;
        }
        Ok(())
    })?;
    Ok(collector.into_hits())
}

pub(crate) fn count(
    plan: &QueryPlan,
    schema: &Schema,
    generation: &Generation,
    tf_saturation_k: f32,
) -> Result<u64> {
    let mut total = 0u64;
    for_each_segment(plan, schema, generation, tf_saturation_k, |_, _, _, scorer| {
        let mut doc = scorer.doc();
        while doc != TERMINATED {
            total += 1;
            doc = scorer.advance()?;
        }
        Ok(())
    })?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_docs_keeps_best() {
        let mut top = TopDocs::new(2);
        top.push(1.0, 0, DocAddress::new(0, 0));
        top.push(3.0, 1, DocAddress::new(0, 1));
        top.push(2.0, 2, DocAddress::new(0, 2));
        top.push(0.5, 3, DocAddress::new(0, 3));
        let hits = top.into_hits();
        let ordinals: Vec<u64> = hits.iter().map(|h| h.global_ordinal).collect();
        assert_eq!(ordinals, vec![1, 2]);
    }

    #[test]
    fn test_ties_prefer_lower_ordinal() {
        let mut top = TopDocs::new(2);
        for ordinal in [5u64, 2, 9, 1] {
            top.push(1.0, ordinal, DocAddress::new(0, ordinal as u32));
        }
        let ordinals: Vec<u64> = top.into_hits().iter().map(|h| h.global_ordinal).collect();
        assert_eq!(ordinals, vec![1, 2]);
    }

    #[test]
    fn test_zero_limit() {
        let mut top = TopDocs::new(0);
        top.push(1.0, 0, DocAddress::new(0, 0));
        assert!(top.into_hits().is_empty());
    }
}
