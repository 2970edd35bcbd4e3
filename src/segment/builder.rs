//! In-memory segment under construction
//!
//! The index writer feeds validated documents here until the memory budget
//! is hit or a commit starts; the builder is then serialized into an
//! immutable segment. Serialization borrows the builder so a failed commit
//! can retry without losing buffered documents.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as JsonValue;

use super::doc_store::DocStoreWriter;
use super::fast_fields::{sortable_u64, FastFieldsWriter};
use super::types::{DocId, Posting, SegmentId, TERMINATED};
use super::writer::{SegmentFiles, SegmentWriter};
use crate::document::{serialize_stored, EncodedDocument, Value};
use crate::error::{LoupeError, Result};
use crate::schema::{json_number_token, FieldId, FieldKind, Schema, Term};
use crate::tokenizer::{Analyzer, Tokenize};

/// Positions skipped between two values of a multi-valued field, so a
/// phrase never matches across values
const POSITION_GAP: u32 = 1;

/// Per-term bookkeeping cost on top of the key bytes
const TERM_OVERHEAD: usize = 48;

#[derive(Default)]
struct Occurrences {
    freq: u32,
    positions: Vec<u32>,
}

/// Collects the terms of a single document before they hit the postings
#[derive(Default)]
struct DocTerms {
    terms: BTreeMap<Vec<u8>, Occurrences>,
    next_position: HashMap<FieldId, u32>,
}

impl DocTerms {
    fn add_untokenized(&mut self, term: Term) {
        self.terms.entry(term.into_key()).or_default().freq += 1;
    }

    fn add_tokens(&mut self, field: FieldId, analyzer: &Analyzer, text: &str, mk: impl Fn(&str) -> Term) {
        let base = self.next_position.get(&field).copied().unwrap_or(0);
        let mut last = None;
        for token in analyzer.tokenize(text) {
            let position = base + token.position;
            let entry = self.terms.entry(mk(&token.text).into_key()).or_default();
            entry.freq += 1;
            entry.positions.push(position);
            last = Some(position);
        }
        if let Some(last) = last {
            self.next_position.insert(field, last + 1 + POSITION_GAP);
        }
    }

    fn add_json(&mut self, field: FieldId, path: &str, value: &JsonValue) {
        match value {
            JsonValue::Null => {}
            JsonValue::Bool(b) => {
                self.add_untokenized(Term::from_json_path(field, path, if *b { "true" } else { "false" }))
            }
            JsonValue::Number(n) => {
                let text = n.to_string();
                let token = json_number_token(&text).unwrap_or(text);
                self.add_untokenized(Term::from_json_path(field, path, &token))
            }
            JsonValue::String(s) => {
                self.add_tokens(field, &Analyzer::Simple, s, |token| {
                    Term::from_json_path(field, path, token)
                });
            }
            JsonValue::Array(items) => {
                for item in items {
                    self.add_json(field, path, item);
                }
            }
            JsonValue::Object(map) => {
                for (key, child) in map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    self.add_json(field, &child_path, child);
                }
            }
        }
    }
}

pub struct SegmentBuilder {
    schema: Schema,
    postings: BTreeMap<Vec<u8>, Vec<Posting>>,
    fast_fields: FastFieldsWriter,
    store: DocStoreWriter,
    opstamps: Vec<u64>,
    postings_bytes: usize,
}

impl SegmentBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            fast_fields: FastFieldsWriter::new(&schema),
            schema,
            postings: BTreeMap::new(),
            store: DocStoreWriter::new(),
            opstamps: Vec::new(),
            postings_bytes: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_docs(&self) -> u32 {
        self.opstamps.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.opstamps.is_empty()
    }

    /// Opstamp of every buffered document, by doc id
    pub fn opstamps(&self) -> &[u64] {
        &self.opstamps
    }

    /// Approximate heap usage, compared against the writer's memory budget
    pub fn mem_usage(&self) -> usize {
        self.postings_bytes
            + self.fast_fields.heap_size()
            + self.store.heap_size()
            + self.opstamps.len() * 8
    }

    /// Index one document; returns its doc id inside this segment
    pub fn add_document(&mut self, opstamp: u64, doc: &EncodedDocument) -> Result<DocId> {
        let doc_id = self.num_docs();
        if doc_id == TERMINATED {
            return Err(LoupeError::InvalidArgument(
                "segment document limit reached".to_string(),
            ));
        }
        let record = serialize_stored(&self.schema, doc)?;

        let mut doc_terms = DocTerms::default();
        for (field, value) in doc.values() {
            let field = *field;
            let entry = self.schema.entry(field);
            if !entry.is_indexed() {
                continue;
            }
            match (entry.kind, value) {
                (FieldKind::Text, Value::Str(text)) => {
                    let analyzer = self.schema.analyzer(field);
                    doc_terms.add_tokens(field, &analyzer, text, |token| {
                        Term::from_field_text(field, token)
                    });
                }
                (FieldKind::U64 | FieldKind::I64 | FieldKind::F64, value) => {
                    if let Some(sortable) = sortable_u64(value) {
                        doc_terms.add_untokenized(Term::from_field_u64(field, sortable));
                    }
                }
                (FieldKind::Bytes, Value::Bytes(bytes)) => {
                    doc_terms.add_untokenized(Term::from_field_bytes(field, bytes));
                }
                (FieldKind::Facet, Value::Facet(facet)) => {
                    for prefix in facet.prefixes() {
                        doc_terms.add_untokenized(Term::from_facet(field, &prefix));
                    }
                }
                (FieldKind::Json, Value::Json(map)) => {
                    for (key, child) in map {
                        doc_terms.add_json(field, key, child);
                    }
                }
                _ => {}
            }
        }

        for (key, occurrences) in doc_terms.terms {
            let posting = Posting {
                doc: doc_id,
                term_frequency: occurrences.freq,
                positions: occurrences.positions,
            };
            self.postings_bytes +=
                std::mem::size_of::<Posting>() + posting.positions.len() * 4;
            match self.postings.get_mut(&key) {
                Some(list) => list.push(posting),
                None => {
                    self.postings_bytes += key.len() + TERM_OVERHEAD;
                    self.postings.insert(key, vec![posting]);
                }
            }
        }

        self.fast_fields.add_document(doc);
        self.store.add(&record);
        self.opstamps.push(opstamp);
        Ok(doc_id)
    }

    /// Serialize into segment files; the builder is left untouched
    pub fn serialize(&self, id: SegmentId) -> Result<SegmentFiles> {
        let mut writer = SegmentWriter::new(id);
        for (key, list) in &self.postings {
            writer.write_term(key.clone(), list.iter().cloned());
        }
        writer.finish(
            self.num_docs(),
            self.fast_fields.serialize()?,
            self.store.to_bytes(),
        )
    }
}
