//! Immutable segment reader
//!
//! Opened from a segment's files after their checksums are verified. All
//! data is held in memory; liveness is tracked separately in `LiveDocs`.

use roaring::RoaringBitmap;

use super::doc_store::DocStoreReader;
use super::fast_fields::{FastColumn, FastFieldsReader};
use super::postings::{PostingIterator, PostingsReader};
use super::term_dict::TermDictionary;
use super::types::{DocId, Posting, PostingListMeta, SegmentId, TERMINATED};
use super::writer::{
    SegmentFiles, SegmentMeta, FAST_FIELDS_FILE, POSTINGS_FILE, STORE_FILE, TERMS_FILE,
    TERM_INFO_FILE,
};
use crate::document::{deserialize_stored, Document};
use crate::error::{LoupeError, Result};
use crate::schema::{FieldId, Schema, Term};

pub struct SegmentReader {
    meta: SegmentMeta,
    terms: TermDictionary,
    postings: PostingsReader,
    fast_fields: FastFieldsReader,
    store: DocStoreReader,
}

impl SegmentReader {
    /// Verify and open a segment
    pub fn open(mut files: SegmentFiles) -> Result<Self> {
        files.verify()?;
        let id = files.meta.id;
        let corrupt = |reason: String| LoupeError::corrupt_segment(id, reason);

        let term_info: Vec<PostingListMeta> = bincode::deserialize(&files.take(TERM_INFO_FILE)?)
            .map_err(|e| corrupt(format!("term info: {}", e)))?;
        let terms = TermDictionary::new(files.take(TERMS_FILE)?, term_info)
            .map_err(|e| corrupt(format!("term dictionary: {}", e)))?;
        let postings = PostingsReader::new(files.take(POSTINGS_FILE)?);
        let fast_fields = FastFieldsReader::open(&files.take(FAST_FIELDS_FILE)?)
            .map_err(|e| corrupt(format!("fast fields: {}", e)))?;
        let store = DocStoreReader::open(files.take(STORE_FILE)?)
            .map_err(|e| corrupt(format!("doc store: {}", e)))?;

        let num_docs = files.meta.num_docs;
        if store.num_docs() != num_docs {
            return Err(corrupt(format!(
                "doc store holds {} docs, meta says {}",
                store.num_docs(),
                num_docs
            )));
        }
        fast_fields.validate(num_docs).map_err(corrupt)?;

        Ok(Self {
            meta: files.meta,
            terms,
            postings,
            fast_fields,
            store,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.meta.id
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Documents in the segment, deleted ones included
    pub fn num_docs(&self) -> u32 {
        self.meta.num_docs
    }

    pub fn size_bytes(&self) -> u64 {
        self.meta.size_bytes()
    }

    pub fn terms(&self) -> &TermDictionary {
        &self.terms
    }

    pub fn term_info(&self, term: &Term) -> Option<&PostingListMeta> {
        self.terms.get(term.as_key())
    }

    /// Number of documents containing `term`, deleted ones included
    pub fn doc_freq(&self, term: &Term) -> u32 {
        self.term_info(term).map_or(0, |info| info.doc_frequency)
    }

    /// Cursor over the postings of `term`, if it occurs in this segment
    pub fn postings(&self, term: &Term, with_positions: bool) -> Result<Option<PostingIterator<'_>>> {
        match self.term_info(term) {
            Some(info) => self.postings_for(info, with_positions).map(Some),
            None => Ok(None),
        }
    }

    pub fn postings_for(
        &self,
        info: &PostingListMeta,
        with_positions: bool,
    ) -> Result<PostingIterator<'_>> {
        self.postings
            .postings(info, with_positions)
            .map_err(|e| self.corrupt(e))
    }

    /// Decode a whole posting list
    pub fn read_postings(&self, info: &PostingListMeta, with_positions: bool) -> Result<Vec<Posting>> {
        self.postings
            .read_all(info, with_positions)
            .map_err(|e| self.corrupt(e))
    }

    /// Every doc containing `term`, deleted or not
    pub fn docs_with_term(&self, term: &Term) -> Result<RoaringBitmap> {
        match self.term_info(term) {
            Some(info) => self.docs_for(info),
            None => Ok(RoaringBitmap::new()),
        }
    }

    /// Every doc in one posting list, deleted or not
    pub fn docs_for(&self, info: &PostingListMeta) -> Result<RoaringBitmap> {
        let mut docs = RoaringBitmap::new();
        let mut cursor = self.postings_for(info, false)?;
        while cursor.doc() != TERMINATED {
            docs.insert(cursor.doc());
            cursor.advance().map_err(|e| self.corrupt(e))?;
        }
        Ok(docs)
    }

    pub fn fast_fields(&self) -> &FastFieldsReader {
        &self.fast_fields
    }

    pub fn fast_column(&self, field: FieldId) -> Option<&FastColumn> {
        self.fast_fields.column(field)
    }

    /// Raw stored record of `doc`
    pub fn stored_record(&self, doc: DocId) -> Result<&[u8]> {
        self.store.get(doc).map_err(|e| self.corrupt(e))
    }

    /// Stored fields of `doc`
    pub fn doc(&self, schema: &Schema, doc: DocId) -> Result<Document> {
        deserialize_stored(schema, self.stored_record(doc)?)
    }

    pub(crate) fn corrupt(&self, err: std::io::Error) -> LoupeError {
        LoupeError::corrupt_segment(self.meta.id, err.to_string())
    }
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("id", &self.meta.id)
            .field("num_docs", &self.meta.num_docs)
            .field("num_terms", &self.terms.len())
            .finish()
    }
}
