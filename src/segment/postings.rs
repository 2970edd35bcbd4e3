//! Postings format with block-based compression
//!
//! A posting list is a header followed by blocks of up to `BLOCK_SIZE` docs:
//! - header: block count, then one skip entry (max doc, block offset) per block
//! - block: doc deltas (bitpacked), term frequencies (bitpacked), then a
//!   length-prefixed positions stream. Each posting contributes its position
//!   count followed by the position deltas, all vbyte. Untokenized terms
//!   record a frequency but no positions, so the count is not the tf.
//!
//! Doc deltas continue across blocks: the first delta of a block is relative
//! to the max doc of the previous block.

use std::io;

use super::types::{DocId, Posting, PostingBlock, PostingListMeta, TERMINATED};

fn corrupt(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Variable-byte encoding for integers
pub fn encode_vbyte(value: u32, output: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            output.push(byte | 0x80); // high bit marks the last byte
            break;
        } else {
            output.push(byte);
        }
    }
}

/// Decode a variable-byte encoded integer
pub fn decode_vbyte(input: &[u8], pos: &mut usize) -> io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;

    loop {
        let byte = *input
            .get(*pos)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of vbyte"))?;
        *pos += 1;

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 != 0 {
            return Ok(result);
        }

        shift += 7;
        if shift > 28 {
            return Err(corrupt("VByte value too large"));
        }
    }
}

/// Pack a block of integers using the minimum bit width of its largest value
pub fn bitpack_encode(values: &[u32], output: &mut Vec<u8>) {
    let max_val = values.iter().copied().max().unwrap_or(0);
    if values.is_empty() || max_val == 0 {
        output.push(0); // all zeros
        return;
    }

    let bits_needed = (32 - max_val.leading_zeros()) as u8;
    output.push(bits_needed);

    let mut current: u64 = 0;
    let mut bits_in_current = 0;

    for &value in values {
        current |= (value as u64) << bits_in_current;
        bits_in_current += bits_needed as u32;

        while bits_in_current >= 8 {
            output.push(current as u8);
            current >>= 8;
            bits_in_current -= 8;
        }
    }

    if bits_in_current > 0 {
        output.push(current as u8);
    }
}

/// Decode `count` bitpacked integers
pub fn bitpack_decode(input: &[u8], pos: &mut usize, count: usize) -> io::Result<Vec<u32>> {
    let bits_needed = *input
        .get(*pos)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of bitpack"))?
        as u32;
    *pos += 1;

    if bits_needed == 0 {
        return Ok(vec![0; count]);
    }
    if bits_needed > 32 {
        return Err(corrupt("Invalid bitpack width"));
    }

    let total_bits = count as u64 * bits_needed as u64;
    let bytes_needed = ((total_bits + 7) / 8) as usize;
    if *pos + bytes_needed > input.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Not enough bytes for bitpack",
        ));
    }

    let mut values = Vec::with_capacity(count);
    let mut current: u64 = 0;
    let mut bits_available = 0;
    let mask = (1u64 << bits_needed) - 1;
    let end = *pos + bytes_needed;

    for _ in 0..count {
        while bits_available < bits_needed {
            if *pos < end {
                current |= (input[*pos] as u64) << bits_available;
                *pos += 1;
            }
            bits_available += 8;
        }

        values.push((current & mask) as u32);
        current >>= bits_needed;
        bits_available -= bits_needed;
    }
    *pos = end;

    Ok(values)
}

fn read_u64_le(input: &[u8], pos: &mut usize) -> io::Result<u64> {
    let bytes = input
        .get(*pos..*pos + 8)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of u64"))?;
    *pos += 8;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Skip data for jumping over whole blocks
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipEntry {
    /// Largest doc in the block
    pub max_doc: DocId,
    /// Offset of the block relative to the first block
    pub block_offset: u64,
}

/// Writer for posting lists
pub struct PostingsWriter {
    block_data: Vec<u8>,
    skip_entries: Vec<SkipEntry>,
    current_block: PostingBlock,
    last_doc: Option<DocId>,
    doc_frequency: u32,
    total_term_frequency: u64,
    data: Vec<u8>,
}

impl PostingsWriter {
    pub fn new() -> Self {
        Self {
            block_data: Vec::new(),
            skip_entries: Vec::new(),
            current_block: PostingBlock::new(),
            last_doc: None,
            doc_frequency: 0,
            total_term_frequency: 0,
            data: Vec::new(),
        }
    }

    /// Start writing a new posting list
    pub fn start_posting_list(&mut self) {
        self.block_data.clear();
        self.skip_entries.clear();
        self.current_block = PostingBlock::new();
        self.last_doc = None;
        self.doc_frequency = 0;
        self.total_term_frequency = 0;
    }

    /// Add a posting; docs must arrive in strictly increasing order
    pub fn add_posting(&mut self, posting: Posting) {
        debug_assert!(self.last_doc.map_or(true, |last| posting.doc > last));
        self.doc_frequency += 1;
        self.total_term_frequency += posting.term_frequency as u64;
        self.current_block.push(posting);

        if self.current_block.is_full() {
            self.flush_block();
        }
    }

    /// Finish the current posting list and return its metadata
    pub fn finish_posting_list(&mut self) -> PostingListMeta {
        if !self.current_block.is_empty() {
            self.flush_block();
        }

        let offset = self.data.len() as u64;

        encode_vbyte(self.skip_entries.len() as u32, &mut self.data);
        for skip in &self.skip_entries {
            encode_vbyte(skip.max_doc, &mut self.data);
            self.data.extend_from_slice(&skip.block_offset.to_le_bytes());
        }
        self.data.extend_from_slice(&self.block_data);

        PostingListMeta {
            offset,
            length: self.data.len() as u64 - offset,
            doc_frequency: self.doc_frequency,
            total_term_frequency: self.total_term_frequency,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the data (consuming the writer)
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn flush_block(&mut self) {
        if self.current_block.is_empty() {
            return;
        }
        let block = std::mem::take(&mut self.current_block);

        self.skip_entries.push(SkipEntry {
            max_doc: block.max_doc,
            block_offset: self.block_data.len() as u64,
        });

        encode_vbyte(block.len() as u32, &mut self.block_data);

        let mut deltas = Vec::with_capacity(block.len());
        let mut prev = self.last_doc.unwrap_or(0);
        for &doc in &block.docs {
            deltas.push(doc - prev);
            prev = doc;
        }
        self.last_doc = Some(prev);
        bitpack_encode(&deltas, &mut self.block_data);
        bitpack_encode(&block.term_frequencies, &mut self.block_data);

        let mut positions = Vec::new();
        for doc_positions in &block.positions {
            encode_vbyte(doc_positions.len() as u32, &mut positions);
            let mut last = 0u32;
            for &p in doc_positions {
                encode_vbyte(p - last, &mut positions);
                last = p;
            }
        }
        encode_vbyte(positions.len() as u32, &mut self.block_data);
        self.block_data.extend_from_slice(&positions);

        self.current_block = PostingBlock::new();
    }
}

impl Default for PostingsWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader over a postings file
pub struct PostingsReader {
    data: Vec<u8>,
}

impl PostingsReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Open an iterator over the postings of one term
    pub fn postings(&self, meta: &PostingListMeta, with_positions: bool) -> io::Result<PostingIterator<'_>> {
        let start = meta.offset as usize;
        let end = (meta.offset + meta.length) as usize;

        if end > self.data.len() || start > end {
            return Err(corrupt("Posting list extends beyond data"));
        }

        PostingIterator::new(&self.data[start..end], with_positions)
    }

    /// Decode a whole posting list
    pub fn read_all(&self, meta: &PostingListMeta, with_positions: bool) -> io::Result<Vec<Posting>> {
        let mut iter = self.postings(meta, with_positions)?;
        let mut out = Vec::with_capacity(meta.doc_frequency as usize);
        while let Some(posting) = iter.posting() {
            out.push(posting.clone());
            iter.advance()?;
        }
        Ok(out)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Cursor over one posting list.
///
/// Positioned on its first posting after construction; `doc()` returns
/// `TERMINATED` once exhausted.
pub struct PostingIterator<'a> {
    data: &'a [u8],
    blocks_start: usize,
    skip_entries: Vec<SkipEntry>,
    /// Index of the block currently decoded into `block`
    block_idx: usize,
    block: Vec<Posting>,
    cursor: usize,
    with_positions: bool,
}

impl<'a> PostingIterator<'a> {
    pub fn new(data: &'a [u8], with_positions: bool) -> io::Result<Self> {
        let mut pos = 0;
        let block_count = decode_vbyte(data, &mut pos)? as usize;

        let mut skip_entries = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let max_doc = decode_vbyte(data, &mut pos)?;
            let block_offset = read_u64_le(data, &mut pos)?;
            skip_entries.push(SkipEntry {
                max_doc,
                block_offset,
            });
        }

        let mut iter = Self {
            data,
            blocks_start: pos,
            skip_entries,
            block_idx: 0,
            block: Vec::new(),
            cursor: 0,
            with_positions,
        };
        if block_count > 0 {
            iter.load_block(0)?;
        }
        Ok(iter)
    }

    /// Current doc, or `TERMINATED`
    pub fn doc(&self) -> DocId {
        self.block.get(self.cursor).map_or(TERMINATED, |p| p.doc)
    }

    pub fn posting(&self) -> Option<&Posting> {
        self.block.get(self.cursor)
    }

    /// Move to the next posting and return its doc
    pub fn advance(&mut self) -> io::Result<DocId> {
        if self.cursor < self.block.len() {
            self.cursor += 1;
        }
        if self.cursor >= self.block.len() && self.block_idx + 1 < self.skip_entries.len() {
            self.load_block(self.block_idx + 1)?;
        }
        Ok(self.doc())
    }

    /// Move to the first posting with doc >= target.
    ///
    /// Never moves backwards; whole blocks are skipped using the skip entries.
    pub fn seek(&mut self, target: DocId) -> io::Result<DocId> {
        if self.doc() >= target {
            return Ok(self.doc());
        }

        let mut idx = self.block_idx;
        while idx < self.skip_entries.len() && self.skip_entries[idx].max_doc < target {
            idx += 1;
        }
        if idx >= self.skip_entries.len() {
            self.block.clear();
            self.cursor = 0;
            self.block_idx = self.skip_entries.len();
            return Ok(TERMINATED);
        }
        if idx != self.block_idx {
            self.load_block(idx)?;
        }
        while self.doc() < target {
            self.advance()?;
        }
        Ok(self.doc())
    }

    fn load_block(&mut self, idx: usize) -> io::Result<()> {
        let entry = self.skip_entries[idx];
        let mut pos = self.blocks_start + entry.block_offset as usize;
        let data = self.data;

        let count = decode_vbyte(data, &mut pos)? as usize;
        if count == 0 {
            return Err(corrupt("Empty posting block"));
        }
        let deltas = bitpack_decode(data, &mut pos, count)?;
        let tfs = bitpack_decode(data, &mut pos, count)?;
        let positions_len = decode_vbyte(data, &mut pos)? as usize;
        let positions_end = pos + positions_len;
        if positions_end > data.len() {
            return Err(corrupt("Positions extend beyond posting list"));
        }

        let mut doc = if idx == 0 {
            0
        } else {
            self.skip_entries[idx - 1].max_doc
        };
        self.block.clear();
        for i in 0..count {
            doc = doc
                .checked_add(deltas[i])
                .ok_or_else(|| corrupt("Doc delta overflow"))?;
            let mut posting = Posting::new(doc, tfs[i]);
            if self.with_positions {
                let num_positions = decode_vbyte(&data[..positions_end], &mut pos)?;
                let mut last = 0u32;
                for _ in 0..num_positions {
                    last += decode_vbyte(&data[..positions_end], &mut pos)?;
                    posting.positions.push(last);
                }
            }
            self.block.push(posting);
        }
        if doc != entry.max_doc {
            return Err(corrupt("Block max doc does not match skip entry"));
        }

        self.block_idx = idx;
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vbyte_encoding() {
        let mut output = Vec::new();

        encode_vbyte(0, &mut output);
        encode_vbyte(127, &mut output);
        encode_vbyte(128, &mut output);
        encode_vbyte(16383, &mut output);
        encode_vbyte(1_000_000, &mut output);

        let mut pos = 0;
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 0);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 127);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 128);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 16383);
        assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), 1_000_000);
        assert!(decode_vbyte(&output, &mut pos).is_err());
    }

    #[test]
    fn test_bitpack_encoding() {
        let values = vec![1000, 2000, 3000, 4000, 0, u32::MAX];
        let mut output = Vec::new();
        bitpack_encode(&values, &mut output);
        bitpack_encode(&[0, 0, 0], &mut output);

        let mut pos = 0;
        assert_eq!(bitpack_decode(&output, &mut pos, values.len()).unwrap(), values);
        assert_eq!(bitpack_decode(&output, &mut pos, 3).unwrap(), vec![0, 0, 0]);
        assert_eq!(pos, output.len());
    }

    #[test]
    fn test_postings_writer_reader() {
        let mut writer = PostingsWriter::new();
        writer.start_posting_list();
        for i in 0..10u32 {
            writer.add_posting(Posting::new(i * 10, i + 1));
        }
        let meta = writer.finish_posting_list();
        assert_eq!(meta.doc_frequency, 10);
        assert_eq!(meta.total_term_frequency, 55);

        let reader = PostingsReader::new(writer.into_data());
        let postings = reader.read_all(&meta, false).unwrap();
        assert_eq!(postings.len(), 10);
        assert_eq!(postings[0], Posting::new(0, 1));
        assert_eq!(postings[5], Posting::new(50, 6));
        assert_eq!(postings[9], Posting::new(90, 10));
    }

    #[test]
    fn test_positions_across_blocks() {
        let mut writer = PostingsWriter::new();
        writer.start_posting_list();
        for doc in 0..300u32 {
            writer.add_posting(Posting::with_positions(doc * 3, vec![doc % 5, doc % 5 + 7]));
        }
        let meta = writer.finish_posting_list();

        let reader = PostingsReader::new(writer.into_data());
        let postings = reader.read_all(&meta, true).unwrap();
        assert_eq!(postings.len(), 300);
        assert_eq!(postings[200].doc, 600);
        assert_eq!(postings[200].positions, vec![0, 7]);
        assert_eq!(postings[299].positions, vec![4, 11]);
    }

    #[test]
    fn test_positions_with_untokenized_postings() {
        let mut writer = PostingsWriter::new();
        writer.start_posting_list();
        // a frequency without positions, as facet and numeric terms are written
        writer.add_posting(Posting::new(0, 2));
        writer.add_posting(Posting::with_positions(3, vec![4]));
        writer.add_posting(Posting::new(5, 1));
        let meta = writer.finish_posting_list();

        let reader = PostingsReader::new(writer.into_data());
        let postings = reader.read_all(&meta, true).unwrap();
        assert_eq!(postings.len(), 3);
        assert_eq!(postings[0].term_frequency, 2);
        assert!(postings[0].positions.is_empty());
        assert_eq!(postings[1].positions, vec![4]);
        assert_eq!(postings[2].doc, 5);
    }

    #[test]
    fn test_two_lists_share_a_file() {
        let mut writer = PostingsWriter::new();
        writer.start_posting_list();
        writer.add_posting(Posting::new(1, 1));
        let first = writer.finish_posting_list();
        writer.start_posting_list();
        writer.add_posting(Posting::new(0, 2));
        writer.add_posting(Posting::new(7, 1));
        let second = writer.finish_posting_list();

        let reader = PostingsReader::new(writer.into_data());
        assert_eq!(reader.read_all(&first, false).unwrap(), vec![Posting::new(1, 1)]);
        let docs: Vec<DocId> = reader.read_all(&second, false).unwrap().iter().map(|p| p.doc).collect();
        assert_eq!(docs, vec![0, 7]);
    }

    #[test]
    fn test_seek_skips_blocks_without_consuming() {
        let mut writer = PostingsWriter::new();
        writer.start_posting_list();
        for i in 0..300u32 {
            writer.add_posting(Posting::new(i * 2, 1));
        }
        let meta = writer.finish_posting_list();

        let reader = PostingsReader::new(writer.into_data());
        let mut iter = reader.postings(&meta, false).unwrap();
        assert_eq!(iter.doc(), 0);
        assert_eq!(iter.seek(401).unwrap(), 402);
        // seeking to a smaller target stays put
        assert_eq!(iter.seek(10).unwrap(), 402);
        assert_eq!(iter.seek(402).unwrap(), 402);
        assert_eq!(iter.advance().unwrap(), 404);
        assert_eq!(iter.seek(599).unwrap(), TERMINATED);
        assert!(iter.posting().is_none());
    }

    #[test]
    fn test_truncated_list_is_an_error() {
        let mut writer = PostingsWriter::new();
        writer.start_posting_list();
        for i in 0..20u32 {
            writer.add_posting(Posting::new(i, 1));
        }
        let meta = writer.finish_posting_list();
        let mut data = writer.into_data();
        data.truncate(data.len() - 3);
        let reader = PostingsReader::new(data);
        assert!(reader.postings(&meta, false).is_err());
    }
}
