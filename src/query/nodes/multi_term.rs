//! Term dictionary expansion shared by prefix, wildcard, fuzzy and exists
//! queries
//!
//! Expanded terms are read through the FST in key order. Their postings are
//! unioned into one bitmap and scored with a constant, so a document matching
//! many expansions ranks the same as one matching a single expansion.

use roaring::RoaringBitmap;

use crate::error::Result;
use crate::query::context::QueryContext;
use crate::query::docset::{BitSetScorer, EmptyScorer, Scorer};
use crate::schema::{FieldId, Term};
use crate::segment::PostingListMeta;

/// Default cap on the number of terms one query expands to
pub const DEFAULT_MAX_EXPANSIONS: usize = 50;

/// Key prefix shared by every term of `field`, or of one JSON path in it
pub(crate) fn scope_key(field: FieldId, json_path: Option<&str>) -> Vec<u8> {
    match json_path {
        Some(path) => Term::from_json_path(field, path, "").into_key(),
        None => Term::from_field_text(field, "").into_key(),
    }
}

/// Terms in scope starting with `literal` that `rank` accepts.
///
/// `rank` sees the term text after the scope key and returns a rank, lower
/// is better. At most `max_expansions` terms are kept, best rank first and
/// key order within a rank.
pub(crate) fn expand_terms<F>(
    ctx: &QueryContext,
    scope: &[u8],
    literal: &str,
    max_expansions: usize,
    mut rank: F,
) -> Vec<PostingListMeta>
where
    F: FnMut(&str) -> Option<u32>,
{
    if max_expansions == 0 {
        return Vec::new();
    }
    let mut prefix = scope.to_vec();
    prefix.extend_from_slice(literal.as_bytes());

    let mut candidates: Vec<(u32, PostingListMeta)> = Vec::new();
    let mut best = 0;
    ctx.reader().terms().visit_prefix(&prefix, |key, meta| {
        let Ok(text) = std::str::from_utf8(&key[scope.len()..]) else {
            return true;
        };
        if let Some(r) = rank(text) {
            candidates.push((r, *meta));
            if r == 0 {
                best += 1;
            }
        }
        // nothing later can beat a full set of rank 0 terms
        best < max_expansions
    });
    candidates.sort_by_key(|(r, _)| *r);
    candidates.truncate(max_expansions);
    candidates.into_iter().map(|(_, meta)| meta).collect()
}

/// Constant-score scorer over the live docs of the given posting lists
pub(crate) fn union_scorer<'a>(
    ctx: &QueryContext<'a>,
    lists: &[PostingListMeta],
    score: f32,
) -> Result<Box<dyn Scorer + 'a>> {
    let reader = ctx.reader();
    let mut docs = RoaringBitmap::new();
    for info in lists {
        docs |= reader.docs_for(info)?;
    }
    docs -= ctx.live().deleted();
    if docs.is_empty() {
        return Ok(Box::new(EmptyScorer));
    }
    Ok(Box::new(BitSetScorer::new(docs, score)))
}
