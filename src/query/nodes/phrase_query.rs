//! Phrase query - terms at consecutive positions

use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::{DocSet, EmptyScorer, Scorer};
use crate::schema::Term;
use crate::segment::{tf_weight, DocId, LiveDocs, PostingIterator, SegmentReader, TERMINATED};

/// Matches documents where the terms occur at their relative offsets.
///
/// Offsets come from the analyzer, so a removed stopword still leaves its
/// gap. The phrase frequency plays the role of tf and the idf is the sum
/// of the member idfs.
#[derive(Clone, Debug)]
pub struct PhraseQuery {
    /// `(offset, term)` pairs, offsets relative to the first term
    pub terms: Vec<(u32, Term)>,
    pub boost: f32,
}

impl PhraseQuery {
    pub fn new(terms: Vec<(u32, Term)>) -> Self {
        Self { terms, boost: 1.0 }
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

/// Number of start positions where every term lines up
fn phrase_frequency(positions: &[(u32, &[u32])]) -> u32 {
    let Some(((first_offset, first), rest)) = positions.split_first() else {
        return 0;
    };
    let mut count = 0;
    for &pos in first.iter() {
        let Some(start) = pos.checked_sub(*first_offset) else {
            continue;
        };
        let aligned = rest.iter().all(|(offset, others)| {
            others.binary_search(&(start + offset)).is_ok()
        });
        if aligned {
            count += 1;
        }
    }
    count
}

/// Streams the live docs where every member term lines up
struct PhraseScorer<'a> {
    /// `(offset, cursor)` per member term
    cursors: Vec<(u32, PostingIterator<'a>)>,
    reader: &'a SegmentReader,
    live: &'a LiveDocs,
    weight: f32,
    k: f32,
    doc: DocId,
    /// Phrase frequency in `doc`
    freq: u32,
    /// Doc frequency of the rarest member term
    rarest: u32,
}

impl<'a> PhraseScorer<'a> {
    /// Find the first phrase match at or after `target`
    fn find(&mut self, mut target: DocId) -> Result<DocId> {
        let reader = self.reader;
        'outer: while target != TERMINATED {
            // leapfrog until every cursor sits on the same doc
            for (_, cursor) in self.cursors.iter_mut() {
                let doc = cursor.seek(target).map_err(|e| reader.corrupt(e))?;
                if doc != target {
                    target = doc;
                    continue 'outer;
                }
            }

            if self.live.is_alive(target) {
                let positions: Vec<(u32, &[u32])> = self
                    .cursors
                    .iter()
                    .map(|(offset, cursor)| {
                        (*offset, cursor.posting().map_or(&[][..], |p| p.positions.as_slice()))
                    })
                    .collect();
                let freq = phrase_frequency(&positions);
                if freq > 0 {
                    self.doc = target;
                    self.freq = freq;
                    return Ok(target);
                }
            }
            target = self.cursors[0].1.advance().map_err(|e| reader.corrupt(e))?;
        }
        self.doc = TERMINATED;
        self.freq = 0;
        Ok(TERMINATED)
    }
}

impl DocSet for PhraseScorer<'_> {
    fn doc(&self) -> DocId {
        self.doc
    }

    fn advance(&mut self) -> Result<DocId> {
        if self.doc == TERMINATED {
            return Ok(TERMINATED);
        }
        let next = self.cursors[0]
            .1
            .advance()
            .map_err(|e| self.reader.corrupt(e))?;
        self.find(next)
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        if target <= self.doc {
            return Ok(self.doc);
        }
        self.find(target)
    }

    fn size_hint(&self) -> u32 {
        if self.doc == TERMINATED {
            0
        } else {
            self.rarest
        }
    }
}

impl Scorer for PhraseScorer<'_> {
    fn score(&mut self) -> f32 {
        tf_weight(self.freq, self.k) * self.weight
    }
}

impl QueryNode for PhraseQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let reader = ctx.reader();
        if self.terms.is_empty() {
            return Ok(Box::new(EmptyScorer));
        }

        let mut cursors: Vec<(u32, PostingIterator<'a>)> = Vec::with_capacity(self.terms.len());
        for (offset, term) in &self.terms {
            match reader.postings(term, true)? {
                Some(cursor) => cursors.push((*offset, cursor)),
                None => return Ok(Box::new(EmptyScorer)),
            }
        }
        let weight: f32 = self.terms.iter().map(|(_, term)| ctx.idf(term)).sum::<f32>() * self.boost;

        let rarest = self
            .terms
            .iter()
            .map(|(_, term)| reader.doc_freq(term))
            .min()
            .unwrap_or(0);
        let start = cursors[0].1.doc();
        let mut scorer = PhraseScorer {
            cursors,
            reader,
            live: ctx.live(),
            weight,
            k: ctx.tf_saturation_k(),
            doc: TERMINATED,
            freq: 0,
            rarest,
        };
        scorer.find(start)?;
        Ok(Box::new(scorer))
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        self.terms
            .iter()
            .map(|(_, term)| ctx.reader().doc_freq(term) as u64)
            .min()
            .unwrap_or(0)
    }

    fn query_type(&self) -> &'static str {
        "phrase"
    }

    fn boost(&self) -> f32 {
        self.boost
    }

    fn apply_boost(&mut self, factor: f32) {
        self.boost *= factor;
    }

    fn clone_box(&self) -> Box<dyn QueryNode> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_frequency() {
        let hello = [0u32, 4, 9];
        let world = [1u32, 7, 10];
        assert_eq!(phrase_frequency(&[(0, &hello), (1, &world)]), 2);
        assert_eq!(phrase_frequency(&[(0, &hello), (2, &world)]), 0);
    }

    #[test]
    fn test_phrase_frequency_with_gap() {
        // "quick _ fox" with a dropped word in between
        let quick = [3u32];
        let fox = [5u32];
        assert_eq!(phrase_frequency(&[(0, &quick), (2, &fox)]), 1);
        assert_eq!(phrase_frequency(&[(0, &quick), (1, &fox)]), 0);
    }
}
