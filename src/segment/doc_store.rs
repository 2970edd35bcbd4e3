//! Doc store: the stored fields of one segment
//!
//! Layout:
//! ```text
//! record*  = [len: u32 LE][crc32: u32 LE][payload]
//! offsets  = [offset: u64 LE] * num_docs
//! footer   = [num_docs: u64 LE]
//! ```
//! Each record is checked against its crc on read so a torn or flipped
//! byte surfaces as an error instead of a garbled document.

use std::io;

use super::types::DocId;

const RECORD_HEADER: usize = 8;
const FOOTER_LEN: usize = 8;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Appends records in doc order
#[derive(Clone, Debug, Default)]
pub struct DocStoreWriter {
    data: Vec<u8>,
    offsets: Vec<u64>,
}

impl DocStoreWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next document's payload
    pub fn add(&mut self, payload: &[u8]) {
        self.offsets.push(self.data.len() as u64);
        self.data
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.data
            .extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        self.data.extend_from_slice(payload);
    }

    pub fn num_docs(&self) -> u32 {
        self.offsets.len() as u32
    }

    pub fn heap_size(&self) -> usize {
        self.data.len() + self.offsets.len() * 8
    }

    /// Serialized store; the writer stays usable
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + self.offsets.len() * 8 + FOOTER_LEN);
        out.extend_from_slice(&self.data);
        for offset in &self.offsets {
            out.extend_from_slice(&offset.to_le_bytes());
        }
        out.extend_from_slice(&(self.offsets.len() as u64).to_le_bytes());
        out
    }
}

/// Random access to stored records
#[derive(Clone, Debug)]
pub struct DocStoreReader {
    data: Vec<u8>,
    offsets: Vec<u64>,
    records_end: usize,
}

impl DocStoreReader {
    pub fn open(data: Vec<u8>) -> io::Result<Self> {
        if data.len() < FOOTER_LEN {
            return Err(invalid("doc store shorter than footer"));
        }
        let footer_start = data.len() - FOOTER_LEN;
        let mut footer = [0u8; 8];
        footer.copy_from_slice(&data[footer_start..]);
        let num_docs = u64::from_le_bytes(footer) as usize;

        let index_len = num_docs
            .checked_mul(8)
            .ok_or_else(|| invalid("doc store index overflow"))?;
        if index_len > footer_start {
            return Err(invalid(format!(
                "doc store claims {} docs but holds {} bytes",
                num_docs,
                data.len()
            )));
        }
        let records_end = footer_start - index_len;

        let mut offsets = Vec::with_capacity(num_docs);
        for chunk in data[records_end..footer_start].chunks_exact(8) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            let offset = u64::from_le_bytes(buf);
            if offset as usize >= records_end {
                return Err(invalid("doc store offset past record area"));
            }
            offsets.push(offset);
        }

        Ok(Self {
            data,
            offsets,
            records_end,
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.offsets.len() as u32
    }

    /// Verified payload of `doc`
    pub fn get(&self, doc: DocId) -> io::Result<&[u8]> {
        let offset = *self
            .offsets
            .get(doc as usize)
            .ok_or_else(|| invalid(format!("doc {} out of range", doc)))? as usize;
        let header_end = offset + RECORD_HEADER;
        if header_end > self.records_end {
            return Err(invalid(format!("record header of doc {} truncated", doc)));
        }
        let mut len = [0u8; 4];
        len.copy_from_slice(&self.data[offset..offset + 4]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&self.data[offset + 4..header_end]);

        let end = header_end + u32::from_le_bytes(len) as usize;
        if end > self.records_end {
            return Err(invalid(format!("record of doc {} truncated", doc)));
        }
        let payload = &self.data[header_end..end];
        if crc32fast::hash(payload) != u32::from_le_bytes(crc) {
            return Err(invalid(format!("checksum mismatch for doc {}", doc)));
        }
        Ok(payload)
    }
}
