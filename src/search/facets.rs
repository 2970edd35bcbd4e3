//! Facet counts
//!
//! Every ancestor of an indexed facet is a term of its own, so the
//! children of a path are exactly the dictionary keys one level below
//! it. Counting intersects each child's postings with the matched docs.

use std::collections::BTreeMap;

use roaring::RoaringBitmap;

use crate::document::Facet;
use crate::error::{QueryError, Result};
use crate::index::SegmentEntry;
use crate::schema::{FieldId, FieldKind, Schema, Term};

/// Facet counts below one root, largest count first
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FacetCounts {
    counts: BTreeMap<Facet, u64>,
}

impl FacetCounts {
    pub fn get(&self, facet: &str) -> u64 {
        Facet::from_path(facet)
            .ok()
            .and_then(|f| self.counts.get(&f).copied())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Children ordered by descending count, then path
    pub fn top(&self, n: usize) -> Vec<(&Facet, u64)> {
        let mut children: Vec<(&Facet, u64)> = self.counts.iter().map(|(f, c)| (f, *c)).collect();
        children.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        children.truncate(n);
        children
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Facet, u64)> {
        self.counts.iter().map(|(f, c)| (f, *c))
    }

    pub(crate) fn add(&mut self, facet: Facet, count: u64) {
        if count > 0 {
            *self.counts.entry(facet).or_insert(0) += count;
        }
    }
}

/// Resolve a facet field by name; it must be indexed
pub(crate) fn facet_field(schema: &Schema, name: &str) -> Result<FieldId> {
    let field = schema
        .field(name)
        .ok_or_else(|| QueryError::UnknownField(name.to_string()))?;
    let entry = schema.entry(field);
    if entry.kind != FieldKind::Facet || !entry.is_indexed() {
        return Err(QueryError::TypeMismatch {
            field: name.to_string(),
            reason: "facet counts need an indexed facet field".to_string(),
        }
        .into());
    }
    Ok(field)
}

/// Count the matched docs of one segment under each direct child of `root`
/// (`None` for the top level)
pub(crate) fn collect_segment(
    segment: &SegmentEntry,
    field: FieldId,
    root: Option<&Facet>,
    matched: &RoaringBitmap,
    counts: &mut FacetCounts,
) -> Result<()> {
    if matched.is_empty() {
        return Ok(());
    }
    let reader = segment.reader();
    let root_path = root.map_or("", Facet::as_str);
    let prefix = Term::from_field_text(field, &format!("{}/", root_path));
    let prefix_len = prefix.as_key().len();

    for (key, info) in reader.terms().prefix_search(prefix.as_key()) {
        let rest = &key[prefix_len..];
        if rest.is_empty() || rest.contains(&b'/') {
            continue;
        }
        let Some(child) = Term::from_key(&key)
            .and_then(|term| term.as_str().map(str::to_string))
            .and_then(|path| Facet::from_path(&path).ok())
        else {
            continue;
        };

        let mut docs = RoaringBitmap::new();
        for posting in reader.read_postings(&info, false)? {
            docs.insert(posting.doc);
        }
        counts.add(child, docs.intersection_len(matched));
    }
    Ok(())
}
