//! Segment merger: combines segments into one, dropping deleted documents
//!
//! Terms are streamed through an FST union of the input dictionaries, so the
//! merged dictionary is built in one sorted pass. Stored records are copied
//! verbatim; surviving documents keep their byte-identical content.

use std::sync::Arc;

use fst::map::OpBuilder;
use fst::Streamer;
use tracing::debug;

use super::doc_store::DocStoreWriter;
use super::fast_fields::FastFieldsWriter;
use super::live_docs::LiveDocs;
use super::reader::SegmentReader;
use super::types::{DocId, Posting, SegmentId};
use super::writer::{SegmentFiles, SegmentWriter};
use crate::error::{LoupeError, Result};
use crate::schema::Schema;

/// Old doc id -> new doc id for one merge input; `None` for deleted docs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocIdMapping {
    new_ids: Vec<Option<DocId>>,
}

impl DocIdMapping {
    fn build(live: &LiveDocs, next: &mut DocId) -> Self {
        let new_ids = (0..live.max_doc())
            .map(|doc| {
                if live.is_alive(doc) {
                    let id = *next;
                    *next += 1;
                    Some(id)
                } else {
                    None
                }
            })
            .collect();
        Self { new_ids }
    }

    pub fn get(&self, old: DocId) -> Option<DocId> {
        self.new_ids.get(old as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.new_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_ids.is_empty()
    }
}

/// One merge input: a segment and the liveness mask to apply
#[derive(Clone, Debug)]
pub struct MergeInput {
    pub reader: Arc<SegmentReader>,
    pub live: LiveDocs,
}

/// Result of a merge
#[derive(Debug)]
pub struct MergeOutput {
    pub files: SegmentFiles,
    /// One mapping per input, in input order
    pub doc_maps: Vec<DocIdMapping>,
}

pub struct SegmentMerger {
    schema: Schema,
    inputs: Vec<MergeInput>,
}

impl SegmentMerger {
    pub fn new(schema: Schema, inputs: Vec<MergeInput>) -> Result<Self> {
        if inputs.is_empty() {
            return Err(LoupeError::InvalidArgument(
                "no segments to merge".to_string(),
            ));
        }
        for input in &inputs {
            if input.live.max_doc() != input.reader.num_docs() {
                return Err(LoupeError::Internal(format!(
                    "liveness mask of {} covers {} docs, segment has {}",
                    input.reader.id(),
                    input.live.max_doc(),
                    input.reader.num_docs()
                )));
            }
        }
        Ok(Self { schema, inputs })
    }

    /// Write the merged segment under `id`
    pub fn write(&self, id: SegmentId) -> Result<MergeOutput> {
        let mut next = 0;
        let doc_maps: Vec<DocIdMapping> = self
            .inputs
            .iter()
            .map(|input| DocIdMapping::build(&input.live, &mut next))
            .collect();
        let num_docs = next;

        let mut writer = SegmentWriter::new(id);
        self.write_postings(&mut writer, &doc_maps)?;

        let mut fast_fields = FastFieldsWriter::new(&self.schema);
        let mut store = DocStoreWriter::new();
        for input in &self.inputs {
            for doc in input.live.alive_bitmap().iter() {
                fast_fields.add_document_from(input.reader.fast_fields(), doc);
                store.add(input.reader.stored_record(doc)?);
            }
        }

        let files = writer.finish(num_docs, fast_fields.serialize()?, store.to_bytes())?;
        debug!(
            segment = %id,
            inputs = self.inputs.len(),
            docs = num_docs,
            terms = files.meta.num_terms,
            "Merged segments"
        );
        Ok(MergeOutput { files, doc_maps })
    }

    fn write_postings(&self, writer: &mut SegmentWriter, doc_maps: &[DocIdMapping]) -> Result<()> {
        let mut op = OpBuilder::new();
        for input in &self.inputs {
            op = op.add(input.reader.terms().fst());
        }
        let mut union = op.union();

        while let Some((key, hits)) = union.next() {
            let mut hits = hits.to_vec();
            hits.sort_by_key(|hit| hit.index);

            let mut merged: Vec<Posting> = Vec::new();
            for hit in hits {
                let input = &self.inputs[hit.index];
                let info = input.reader.terms().meta_at(hit.value).ok_or_else(|| {
                    LoupeError::corrupt_segment(input.reader.id(), "term ordinal out of range")
                })?;
                for mut posting in input.reader.read_postings(info, true)? {
                    if let Some(new_doc) = doc_maps[hit.index].get(posting.doc) {
                        posting.doc = new_doc;
                        merged.push(posting);
                    }
                }
            }
            writer.write_term(key.to_vec(), merged);
        }
        Ok(())
    }
}
