//! Doc-ordered scorer cursors
//!
//! Every query node builds a `Scorer` for one segment: a cursor over the
//! live documents it matches, in ascending doc id order. A fresh scorer is
//! already positioned on its first match and `TERMINATED` marks the end.
//! Boolean nodes combine child cursors (leapfrog intersection, min-doc
//! union, exclusion), so a match reaches the collector as soon as it is
//! found instead of after the whole segment has been enumerated.

use roaring::RoaringBitmap;

use crate::error::Result;
use crate::segment::{DocId, LiveDocs, TERMINATED};

/// Cursor over doc ids in ascending order
pub trait DocSet {
    /// Current doc, or `TERMINATED`
    fn doc(&self) -> DocId;

    /// Move to the next doc and return it
    fn advance(&mut self) -> Result<DocId>;

    /// Move to the first doc `>= target`. Never moves backwards.
    fn seek(&mut self, target: DocId) -> Result<DocId> {
        let mut doc = self.doc();
        while doc < target {
            doc = self.advance()?;
        }
        Ok(doc)
    }

    /// Upper bound on the docs left to visit
    fn size_hint(&self) -> u32;
}

pub trait Scorer: DocSet {
    /// Score of the current doc
    fn score(&mut self) -> f32;
}

/// Every doc a scorer still has to visit
pub fn collect_docs(scorer: &mut dyn Scorer) -> Result<RoaringBitmap> {
    let mut docs = RoaringBitmap::new();
    let mut doc = scorer.doc();
    while doc != TERMINATED {
        docs.insert(doc);
        doc = scorer.advance()?;
    }
    Ok(docs)
}

/// Matches nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyScorer;

impl DocSet for EmptyScorer {
    fn doc(&self) -> DocId {
        TERMINATED
    }

    fn advance(&mut self) -> Result<DocId> {
        Ok(TERMINATED)
    }

    fn size_hint(&self) -> u32 {
        0
    }
}

impl Scorer for EmptyScorer {
    fn score(&mut self) -> f32 {
        0.0
    }
}

/// Every doc of a bitmap, with one constant score
pub struct BitSetScorer {
    docs: roaring::bitmap::IntoIter,
    doc: DocId,
    remaining: u32,
    score: f32,
}

impl BitSetScorer {
    pub fn new(bitmap: RoaringBitmap, score: f32) -> Self {
        let remaining = bitmap.len() as u32;
        let mut docs = bitmap.into_iter();
        let doc = docs.next().unwrap_or(TERMINATED);
        Self {
            docs,
            doc,
            remaining,
            score,
        }
    }
}

impl DocSet for BitSetScorer {
    fn doc(&self) -> DocId {
        self.doc
    }

    fn advance(&mut self) -> Result<DocId> {
        if self.doc != TERMINATED {
            self.remaining = self.remaining.saturating_sub(1);
            self.doc = self.docs.next().unwrap_or(TERMINATED);
        }
        Ok(self.doc)
    }

    fn size_hint(&self) -> u32 {
        self.remaining
    }
}

impl Scorer for BitSetScorer {
    fn score(&mut self) -> f32 {
        self.score
    }
}

/// Every live doc of a segment, with one constant score
pub struct AllScorer<'a> {
    live: &'a LiveDocs,
    doc: DocId,
    score: f32,
}

impl<'a> AllScorer<'a> {
    pub fn new(live: &'a LiveDocs, score: f32) -> Self {
        let mut scorer = Self {
            live,
            doc: 0,
            score,
        };
        scorer.doc = scorer.next_alive(0);
        scorer
    }

    fn next_alive(&self, mut doc: DocId) -> DocId {
        let max_doc = self.live.max_doc();
        while doc < max_doc {
            if self.live.is_alive(doc) {
                return doc;
            }
            doc += 1;
        }
        TERMINATED
    }
}

impl DocSet for AllScorer<'_> {
    fn doc(&self) -> DocId {
        self.doc
    }

    fn advance(&mut self) -> Result<DocId> {
        if self.doc != TERMINATED {
            self.doc = self.next_alive(self.doc + 1);
        }
        Ok(self.doc)
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        if self.doc != TERMINATED && target > self.doc {
            self.doc = self.next_alive(target);
        }
        Ok(self.doc)
    }

    fn size_hint(&self) -> u32 {
        self.live.max_doc().saturating_sub(self.doc)
    }
}

impl Scorer for AllScorer<'_> {
    fn score(&mut self) -> f32 {
        self.score
    }
}

/// Docs on which every child agrees; scores are summed
pub struct Intersection<'a> {
    children: Vec<Box<dyn Scorer + 'a>>,
    doc: DocId,
}

impl<'a> Intersection<'a> {
    /// `children` must not be empty
    pub fn new(mut children: Vec<Box<dyn Scorer + 'a>>) -> Result<Self> {
        // the sparsest cursor leads
        children.sort_by_key(|child| child.size_hint());
        let start = children.first().map_or(TERMINATED, |child| child.doc());
        let mut intersection = Self {
            children,
            doc: TERMINATED,
        };
        intersection.align(start)?;
        Ok(intersection)
    }

    /// Leapfrog until every child sits on the same doc
    fn align(&mut self, mut target: DocId) -> Result<DocId> {
        'outer: while target != TERMINATED {
            for child in self.children.iter_mut() {
                let doc = child.seek(target)?;
                if doc != target {
                    target = doc;
                    continue 'outer;
                }
            }
            break;
        }
        self.doc = target;
        Ok(target)
    }
}

impl DocSet for Intersection<'_> {
    fn doc(&self) -> DocId {
        self.doc
    }

    fn advance(&mut self) -> Result<DocId> {
        if self.doc == TERMINATED {
            return Ok(TERMINATED);
        }
        let next = self.children[0].advance()?;
        self.align(next)
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        if target <= self.doc {
            return Ok(self.doc);
        }
        self.align(target)
    }

    fn size_hint(&self) -> u32 {
        self.children.first().map_or(0, |child| child.size_hint())
    }
}

impl Scorer for Intersection<'_> {
    fn score(&mut self) -> f32 {
        self.children.iter_mut().map(|child| child.score()).sum()
    }
}

/// Docs matched by any child; the scores of the children on a doc are summed
pub struct Union<'a> {
    children: Vec<Box<dyn Scorer + 'a>>,
    doc: DocId,
}

impl<'a> Union<'a> {
    pub fn new(children: Vec<Box<dyn Scorer + 'a>>) -> Self {
        let mut union = Self {
            children,
            doc: TERMINATED,
        };
        union.doc = union.min_doc();
        union
    }

    fn min_doc(&self) -> DocId {
        self.children
            .iter()
            .map(|child| child.doc())
            .min()
            .unwrap_or(TERMINATED)
    }
}

impl DocSet for Union<'_> {
    fn doc(&self) -> DocId {
        self.doc
    }

    fn advance(&mut self) -> Result<DocId> {
        if self.doc == TERMINATED {
            return Ok(TERMINATED);
        }
        for child in self.children.iter_mut() {
            if child.doc() == self.doc {
                child.advance()?;
            }
        }
        self.doc = self.min_doc();
        Ok(self.doc)
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        if target <= self.doc {
            return Ok(self.doc);
        }
        for child in self.children.iter_mut() {
            child.seek(target)?;
        }
        self.doc = self.min_doc();
        Ok(self.doc)
    }

    fn size_hint(&self) -> u32 {
        self.children
            .iter()
            .fold(0u32, |acc, child| acc.saturating_add(child.size_hint()))
    }
}

impl Scorer for Union<'_> {
    fn score(&mut self) -> f32 {
        let doc = self.doc;
        self.children
            .iter_mut()
            .filter(|child| child.doc() == doc)
            .map(|child| child.score())
            .sum()
    }
}

/// Docs of `required`; `optional` only adds its score where it matches too
pub struct RequiredOptional<'a> {
    required: Box<dyn Scorer + 'a>,
    optional: Box<dyn Scorer + 'a>,
}

impl<'a> RequiredOptional<'a> {
    pub fn new(required: Box<dyn Scorer + 'a>, optional: Box<dyn Scorer + 'a>) -> Result<Self> {
        let mut scorer = Self { required, optional };
        scorer.follow()?;
        Ok(scorer)
    }

    /// Keep the optional cursor level with the required one
    fn follow(&mut self) -> Result<DocId> {
        let doc = self.required.doc();
        if doc != TERMINATED {
            self.optional.seek(doc)?;
        }
        Ok(doc)
    }
}

impl DocSet for RequiredOptional<'_> {
    fn doc(&self) -> DocId {
        self.required.doc()
    }

    fn advance(&mut self) -> Result<DocId> {
        self.required.advance()?;
        self.follow()
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        self.required.seek(target)?;
        self.follow()
    }

    fn size_hint(&self) -> u32 {
        self.required.size_hint()
    }
}

impl Scorer for RequiredOptional<'_> {
    fn score(&mut self) -> f32 {
        let mut score = self.required.score();
        if self.optional.doc() == self.required.doc() {
            score += self.optional.score();
        }
        score
    }
}

/// Docs of `include` that `exclude` does not match; scores unchanged
pub struct Exclude<'a> {
    include: Box<dyn Scorer + 'a>,
    exclude: Box<dyn Scorer + 'a>,
}

impl<'a> Exclude<'a> {
    pub fn new(include: Box<dyn Scorer + 'a>, exclude: Box<dyn Scorer + 'a>) -> Result<Self> {
        let mut scorer = Self { include, exclude };
        scorer.skip_excluded()?;
        Ok(scorer)
    }

    fn skip_excluded(&mut self) -> Result<DocId> {
        let mut doc = self.include.doc();
        while doc != TERMINATED && self.exclude.seek(doc)? == doc {
            doc = self.include.advance()?;
        }
        Ok(doc)
    }
}

impl DocSet for Exclude<'_> {
    fn doc(&self) -> DocId {
        self.include.doc()
    }

    fn advance(&mut self) -> Result<DocId> {
        self.include.advance()?;
        self.skip_excluded()
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        self.include.seek(target)?;
        self.skip_excluded()
    }

    fn size_hint(&self) -> u32 {
        self.include.size_hint()
    }
}

impl Scorer for Exclude<'_> {
    fn score(&mut self) -> f32 {
        self.include.score()
    }
}

/// Multiplies the scores of another scorer
pub struct Boosted<'a> {
    inner: Box<dyn Scorer + 'a>,
    factor: f32,
}

impl<'a> Boosted<'a> {
    /// Wraps only when the factor changes anything
    pub fn wrap(inner: Box<dyn Scorer + 'a>, factor: f32) -> Box<dyn Scorer + 'a> {
        if factor == 1.0 {
            inner
        } else {
            Box::new(Self { inner, factor })
        }
    }
}

impl DocSet for Boosted<'_> {
    fn doc(&self) -> DocId {
        self.inner.doc()
    }

    fn advance(&mut self) -> Result<DocId> {
        self.inner.advance()
    }

    fn seek(&mut self, target: DocId) -> Result<DocId> {
        self.inner.seek(target)
    }

    fn size_hint(&self) -> u32 {
        self.inner.size_hint()
    }
}

impl Scorer for Boosted<'_> {
    fn score(&mut self) -> f32 {
        self.inner.score() * self.factor
    }
}
