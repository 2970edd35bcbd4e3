//! Fast fields: per-segment numeric columns
//!
//! Values are kept in their order-preserving u64 form, so one range check
//! works for u64, i64 and f64 fields. A document may hold several values;
//! `offsets[doc]..offsets[doc + 1]` delimits them.

use std::collections::BTreeMap;
use std::ops::Bound;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use super::types::DocId;
use crate::document::{EncodedDocument, Value};
use crate::error::Result;
use crate::schema::{f64_to_u64, i64_to_u64, FieldId, Schema};

/// Order-preserving u64 form of a numeric value
pub fn sortable_u64(value: &Value) -> Option<u64> {
    match value {
        Value::U64(v) => Some(*v),
        Value::I64(v) => Some(i64_to_u64(*v)),
        Value::F64(v) => Some(f64_to_u64(*v)),
        _ => None,
    }
}

/// Immutable column for one fast field
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FastColumn {
    offsets: Vec<u32>,
    values: Vec<u64>,
    min_value: Option<u64>,
    max_value: Option<u64>,
}

impl FastColumn {
    pub fn num_docs(&self) -> u32 {
        self.offsets.len().saturating_sub(1) as u32
    }

    /// All values of a document, in insertion order
    pub fn values(&self, doc: DocId) -> &[u64] {
        let idx = doc as usize;
        match (self.offsets.get(idx), self.offsets.get(idx + 1)) {
            (Some(&start), Some(&end)) => &self.values[start as usize..end as usize],
            _ => &[],
        }
    }

    pub fn first(&self, doc: DocId) -> Option<u64> {
        self.values(doc).first().copied()
    }

    pub fn min_value(&self) -> Option<u64> {
        self.min_value
    }

    pub fn max_value(&self) -> Option<u64> {
        self.max_value
    }

    /// Documents with at least one value inside the bounds
    pub fn range_docs(&self, lower: Bound<u64>, upper: Bound<u64>) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        let (min, max) = match (self.min_value, self.max_value) {
            (Some(min), Some(max)) => (min, max),
            _ => return result,
        };
        let in_range = |v: u64| {
            let above = match lower {
                Bound::Included(lo) => v >= lo,
                Bound::Excluded(lo) => v > lo,
                Bound::Unbounded => true,
            };
            let below = match upper {
                Bound::Included(hi) => v <= hi,
                Bound::Excluded(hi) => v < hi,
                Bound::Unbounded => true,
            };
            above && below
        };

        // Column-level bounds check
        let disjoint = match (lower, upper) {
            (Bound::Included(lo), _) if lo > max => true,
            (Bound::Excluded(lo), _) if lo >= max => true,
            (_, Bound::Included(hi)) if hi < min => true,
            (_, Bound::Excluded(hi)) if hi <= min => true,
            _ => false,
        };
        if disjoint {
            return result;
        }

        for doc in 0..self.num_docs() {
            if self.values(doc).iter().any(|&v| in_range(v)) {
                result.insert(doc);
            }
        }
        result
    }
}

/// Accumulates one column
#[derive(Clone, Debug)]
pub struct FastColumnWriter {
    offsets: Vec<u32>,
    values: Vec<u64>,
}

impl Default for FastColumnWriter {
    fn default() -> Self {
        Self {
            offsets: vec![0],
            values: Vec::new(),
        }
    }
}

impl FastColumnWriter {
    pub fn add_doc(&mut self, values: impl IntoIterator<Item = u64>) {
        self.values.extend(values);
        self.offsets.push(self.values.len() as u32);
    }

    fn to_column(&self) -> FastColumn {
        FastColumn {
            offsets: self.offsets.clone(),
            values: self.values.clone(),
            min_value: self.values.iter().copied().min(),
            max_value: self.values.iter().copied().max(),
        }
    }

    fn heap_size(&self) -> usize {
        self.offsets.len() * 4 + self.values.len() * 8
    }
}

/// Writers for every fast field of a schema
#[derive(Clone, Debug, Default)]
pub struct FastFieldsWriter {
    columns: BTreeMap<FieldId, FastColumnWriter>,
}

impl FastFieldsWriter {
    pub fn new(schema: &Schema) -> Self {
        let columns = schema
            .fields()
            .filter(|(_, entry)| entry.is_fast())
            .map(|(field, _)| (field, FastColumnWriter::default()))
            .collect();
        Self { columns }
    }

    /// Append one document's values to every column
    pub fn add_document(&mut self, doc: &EncodedDocument) {
        for (field, column) in self.columns.iter_mut() {
            column.add_doc(doc.values_for(*field).filter_map(sortable_u64));
        }
    }

    /// Append a document copied from an existing segment
    pub fn add_document_from(&mut self, source: &FastFieldsReader, doc: DocId) {
        for (field, column) in self.columns.iter_mut() {
            let values = source.column(*field).map(|c| c.values(doc)).unwrap_or(&[]);
            column.add_doc(values.iter().copied());
        }
    }

    pub fn heap_size(&self) -> usize {
        self.columns.values().map(FastColumnWriter::heap_size).sum()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let columns: Vec<(u16, FastColumn)> = self
            .columns
            .iter()
            .map(|(field, writer)| (field.0, writer.to_column()))
            .collect();
        Ok(bincode::serialize(&columns)?)
    }
}

/// Fast columns of one segment
#[derive(Clone, Debug, Default)]
pub struct FastFieldsReader {
    columns: BTreeMap<FieldId, FastColumn>,
}

impl FastFieldsReader {
    pub fn open(bytes: &[u8]) -> Result<Self> {
        let columns: Vec<(u16, FastColumn)> = bincode::deserialize(bytes)?;
        Ok(Self {
            columns: columns
                .into_iter()
                .map(|(field, column)| (FieldId(field), column))
                .collect(),
        })
    }

    pub fn column(&self, field: FieldId) -> Option<&FastColumn> {
        self.columns.get(&field)
    }

    /// Check every column covers exactly `num_docs` documents
    pub fn validate(&self, num_docs: u32) -> std::result::Result<(), String> {
        for (field, column) in &self.columns {
            if column.num_docs() != num_docs {
                return Err(format!(
                    "fast column {} has {} docs, segment has {}",
                    field,
                    column.num_docs(),
                    num_docs
                ));
            }
            if column.offsets.last().copied().unwrap_or(0) as usize != column.values.len()
                || column.offsets.windows(2).any(|w| w[0] > w[1])
            {
                return Err(format!("fast column {} has inconsistent offsets", field));
            }
        }
        Ok(())
    }
}
