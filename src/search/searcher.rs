//! Point-in-time searcher
//!
//! A `Searcher` holds one generation for its whole lifetime. Commits and
//! merges published afterwards are invisible to it, and the segments it
//! references stay on disk until the last holder drops them.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::debug;

use super::aggregations::{self, AggregationResults, Aggregations};
use super::executor::{self, SearchHit};
use super::facets::{self, FacetCounts};
use crate::document::{Document, Facet};
use crate::error::{LoupeError, Result};
use crate::index::{Generation, Index, SegmentEntry};
use crate::query::{collect_docs, QueryContext, QueryPlan};
use crate::schema::Schema;
use crate::segment::{DocAddress, SegmentId};

#[derive(Clone)]
pub struct Searcher {
    index: Index,
    generation: Arc<Generation>,
}

impl Searcher {
    pub(crate) fn new(index: Index, generation: Arc<Generation>) -> Self {
        Self { index, generation }
    }

    pub fn schema(&self) -> &Schema {
        self.index.schema()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    /// Live documents in this snapshot
    pub fn num_docs(&self) -> u64 {
        self.generation.num_alive()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.generation.segment_ids()
    }

    pub fn segment(&self, segment_ord: u32) -> Option<&SegmentEntry> {
        self.generation.segments().get(segment_ord as usize)
    }

    /// Parse a query against this index's schema
    pub fn parse_query(&self, query: &str) -> Result<QueryPlan> {
        QueryPlan::parse(query, self.schema())
    }

    /// Best `limit` hits, by descending score then ascending global ordinal
    pub fn search(&self, plan: &QueryPlan, limit: usize) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let hits = executor::top_docs(
            plan,
            self.schema(),
            &self.generation,
            self.tf_saturation_k(),
            limit,
        )?;
        let elapsed = start.elapsed();
        self.index.metrics().record_search(elapsed.as_secs_f64());
        debug!(
            generation = self.generation.id(),
            hits = hits.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "Search executed"
        );
        Ok(hits)
    }

    pub fn search_str(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let plan = self.parse_query(query)?;
        self.search(&plan, limit)
    }

    /// Hits together with their stored fields
    pub fn search_documents(&self, query: &str, limit: usize) -> Result<Vec<(SearchHit, Document)>> {
        self.search_str(query, limit)?
            .into_iter()
            .map(|hit| Ok((hit, self.doc(hit.address)?)))
            .collect()
    }

    /// Number of matching live documents
    pub fn count(&self, plan: &QueryPlan) -> Result<u64> {
        executor::count(plan, self.schema(), &self.generation, self.tf_saturation_k())
    }

    /// Run named aggregations over the live documents `plan` matches
    pub fn aggregate(&self, plan: &QueryPlan, requests: &Aggregations) -> Result<AggregationResults> {
        let start = Instant::now();
        let results = aggregations::collect(
            plan,
            self.schema(),
            &self.generation,
            self.tf_saturation_k(),
            requests,
        )?;
        debug!(
            generation = self.generation.id(),
            aggregations = results.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Aggregations collected"
        );
        Ok(results)
    }

    /// Stored fields of a document in this snapshot
    pub fn doc(&self, address: DocAddress) -> Result<Document> {
        let segment = self.segment(address.segment_ord).ok_or_else(|| {
            LoupeError::InvalidArgument(format!(
                "segment ordinal {} out of range ({} segments)",
                address.segment_ord,
                self.generation.segments().len()
            ))
        })?;
        if address.doc >= segment.num_docs() {
            return Err(LoupeError::InvalidArgument(format!(
                "doc {} out of range in {}",
                address.doc,
                segment.id()
            )));
        }
        segment.reader().doc(self.schema(), address.doc)
    }

    /// Stored fields as JSON; bytes are base64, facets are path strings
    pub fn doc_json(&self, address: DocAddress) -> Result<JsonValue> {
        Ok(self.doc(address)?.to_json())
    }

    /// Matching documents per direct child of `root` ("/" for the top level)
    pub fn facet_counts(&self, plan: &QueryPlan, field: &str, root: &str) -> Result<FacetCounts> {
        let field = facets::facet_field(self.schema(), field)?;
        let root = if root == "/" {
            None
        } else {
            Some(Facet::from_path(root)?)
        };

        let num_alive = self.generation.num_alive();
        let mut counts = FacetCounts::default();
        for segment in self.generation.segments() {
            let ctx = QueryContext::new(self.schema(), segment, num_alive, self.tf_saturation_k());
            let matched = collect_docs(plan.scorer(&ctx)?.as_mut())?;
            facets::collect_segment(segment, field, root.as_ref(), &matched, &mut counts)?;
        }
        Ok(counts)
    }

    /// A searcher on the index's current generation. This one stays valid.
    pub fn reload(&self) -> Searcher {
        Searcher::new(self.index.clone(), self.index.current_generation())
    }

    fn tf_saturation_k(&self) -> f32 {
        self.index.settings().scoring.tf_saturation_k
    }
}

impl std::fmt::Debug for Searcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Searcher")
            .field("generation", &self.generation.id())
            .field("segments", &self.generation.segments().len())
            .field("num_docs", &self.num_docs())
            .finish()
    }
}
