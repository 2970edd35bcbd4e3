//! Term query - exact match of one term

use crate::error::Result;
use crate::query::ast::QueryNode;
use crate::query::context::QueryContext;
use crate::query::docset::{DocSet, EmptyScorer, Scorer};
use crate::schema::Term;
use crate::segment::{tf_weight, DocId, LiveDocs, PostingIterator, SegmentReader, TERMINATED};

/// Matches documents containing an exact term.
///
/// Score: `tf_weight(tf) * idf * boost`.
#[derive(Clone, Debug)]
pub struct TermQuery {
    pub term: Term,
    pub boost: f32,
}

impl TermQuery {
    pub fn new(term: Term) -> Self {
        Self { term, boost: 1.0 }
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

/// How a postings cursor turns a posting into a score
#[derive(Clone, Copy, Debug)]
pub(crate) enum TermScoring {
    /// `tf_weight(tf, k) * weight`
    Saturated { weight: f32, k: f32 },
    Constant(f32),
}

/// Streams the live postings of one term
pub(crate) struct TermScorer<'a> {
    postings: PostingIterator<'a>,
    reader: &'a SegmentReader,
    live: &'a LiveDocs,
    scoring: TermScoring,
    remaining: u32,
}

impl<'a> TermScorer<'a> {
    pub(crate) fn open(
        ctx: &QueryContext<'a>,
        term: &Term,
        scoring: TermScoring,
    ) -> Result<Option<Self>> {
        let reader = ctx.reader();
        let Some(postings) = reader.postings(term, false)? else {
            return Ok(None);
        };
        let mut scorer = Self {
            postings,
            reader,
            live: ctx.live(),
            scoring,
            remaining: reader.doc_freq(term),
        };
        scorer.skip_deleted()?;
        Ok(Some(scorer))
    }

    fn skip_deleted(&mut self) -> Result<DocId> {
        let mut doc = self.postings.doc();
        while doc != TERMINATED && !self.live.is_alive(doc) {
            doc = self.step()?;
        }
        Ok(doc)
    }

    fn step(&mut self) -> Result<DocId> {
        self.remaining = self.remaining.saturating_sub(1);
        self.postings.advance().map_err(|e| self.reader.corrupt(e))
    }
}

impl DocSet for TermScorer<'_> {
    fn doc(&self) -> DocId {
        self.postings.doc()
    }

    fn advance(&mut self) -> Result<DocId> {
        if self.postings.doc() == TERMINATED {
            return Ok(TERMINATED);
        }
        self.step()?;
        self.skip_deleted()
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        if target <= self.postings.doc() {
            return Ok(self.postings.doc());
        }
        self.postings
            .seek(target)
            .map_err(|e| self.reader.corrupt(e))?;
        self.skip_deleted()
    }

    fn size_hint(&self) -> u32 {
        self.remaining
    }
}

impl Scorer for TermScorer<'_> {
    fn score(&mut self) -> f32 {
        match self.scoring {
            TermScoring::Saturated { weight, k } => {
                let tf = self.postings.posting().map_or(0, |p| p.term_frequency);
                tf_weight(tf, k) * weight
            }
            TermScoring::Constant(score) => score,
        }
    }
}

impl QueryNode for TermQuery {
    fn scorer<'a>(&self, ctx: &QueryContext<'a>) -> Result<Box<dyn Scorer + 'a>> {
        let scoring = TermScoring::Saturated {
            weight: ctx.idf(&self.term) * self.boost,
            k: ctx.tf_saturation_k(),
        };
        Ok(match TermScorer::open(ctx, &self.term, scoring)? {
            Some(scorer) => Box::new(scorer),
            None => Box::new(EmptyScorer),
        })
    }

    fn estimate_cost(&self, ctx: &QueryContext) -> u64 {
        ctx.reader().doc_freq(&self.term) as u64
    }

    fn query_type(&self) -> &'static str {
        "term"
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
