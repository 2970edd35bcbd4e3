//! Query execution context
//!
//! A `QueryContext` binds a query to one segment of a generation. Query
//! nodes read postings and fast columns through it, and take their
//! collection statistics (live documents across the whole generation)
//! from it so scores are comparable across segments.

use crate::index::SegmentEntry;
use crate::schema::{Schema, Term};
use crate::segment::{idf, LiveDocs, SegmentReader};

pub struct QueryContext<'a> {
    schema: &'a Schema,
    segment: &'a SegmentEntry,
    /// Live documents in the searched generation
    num_alive: u64,
    tf_saturation_k: f32,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        schema: &'a Schema,
        segment: &'a SegmentEntry,
        num_alive: u64,
        tf_saturation_k: f32,
    ) -> Self {
        Self {
            schema,
            segment,
            num_alive,
            tf_saturation_k,
        }
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn reader(&self) -> &'a SegmentReader {
        self.segment.reader()
    }

    pub fn live(&self) -> &'a LiveDocs {
        self.segment.live()
    }

    pub fn num_alive(&self) -> u64 {
        self.num_alive
    }

    /// idf of `term`, with df taken from this segment
    pub fn idf(&self, term: &Term) -> f32 {
        idf(self.num_alive, self.reader().doc_freq(term) as u64)
    }

    pub fn tf_saturation_k(&self) -> f32 {
        self.tf_saturation_k
    }
}
