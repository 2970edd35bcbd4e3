//! Append-only commit log
//!
//! Record format:
//! - u32 length (little endian)
//! - u32 crc32 of payload
//! - bincode `IndexManifest`
//!
//! The last record whose checksum verifies is the committed generation.
//! A torn tail (crash mid-append) is cut off on open.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::manifest::IndexManifest;
use super::store::sync_dir;
use crate::error::{LoupeError, Result};

pub const COMMIT_LOG_FILE: &str = "commits.log";

/// The log is rewritten to a single record once it holds more than this
pub const COMPACT_AFTER_RECORDS: usize = 64;

const HEADER_LEN: usize = 8;

pub struct CommitLog {
    path: PathBuf,
    file: File,
    records: usize,
    /// Bytes of complete records
    len: u64,
}

/// Outcome of scanning a log file
struct Scan {
    last: Option<IndexManifest>,
    records: usize,
    valid_len: usize,
}

fn scan(bytes: &[u8]) -> Result<Scan> {
    let mut pos = 0;
    let mut last = None;
    let mut records = 0;
    while pos + HEADER_LEN <= bytes.len() {
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[pos..pos + 4]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&bytes[pos + 4..pos + HEADER_LEN]);
        let start = pos + HEADER_LEN;
        let end = start + u32::from_le_bytes(len) as usize;
        if end > bytes.len() {
            break;
        }
        let payload = &bytes[start..end];
        if crc32fast::hash(payload) != u32::from_le_bytes(crc) {
            break;
        }
        last = Some(IndexManifest::from_bincode(payload)?);
        records += 1;
        pos = end;
    }
    Ok(Scan {
        last,
        records,
        valid_len: pos,
    })
}

fn encode_record(manifest: &IndexManifest) -> Result<Vec<u8>> {
    let payload = manifest.to_bincode()?;
    let mut record = Vec::with_capacity(HEADER_LEN + payload.len());
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    record.extend_from_slice(&payload);
    Ok(record)
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?)
}

impl CommitLog {
    /// Open or create the log and recover the last committed manifest
    pub fn open(path: PathBuf) -> Result<(Self, Option<IndexManifest>)> {
        let mut file = open_append(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let scan = scan(&bytes)?;
        if scan.valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                valid = scan.valid_len,
                total = bytes.len(),
                "Discarding torn commit log tail"
            );
            file.set_len(scan.valid_len as u64)?;
            file.sync_all()?;
        }
        debug!(records = scan.records, "Commit log opened");

        Ok((
            Self {
                path,
                file,
                records: scan.records,
                len: scan.valid_len as u64,
            },
            scan.last,
        ))
    }

    /// Read the last committed manifest without opening the log for writing
    pub fn read_last(path: &Path) -> Result<Option<IndexManifest>> {
        match fs::read(path) {
            Ok(bytes) => Ok(scan(&bytes)?.last),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LoupeError::Io(e)),
        }
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// Durably append a manifest; returns once it is on disk
    pub fn append(&mut self, manifest: &IndexManifest) -> Result<()> {
        let record = encode_record(manifest)?;
        if let Err(e) = self.write_record(&record) {
            // a partial record would hide every later append from recovery
            if let Err(cut) = self.file.set_len(self.len) {
                warn!(error = %cut, "Failed to cut partial commit log record");
            }
            return Err(e);
        }
        self.len += record.len() as u64;
        self.records += 1;

        // the record is durable, so a failed compaction only postpones it
        if self.records > COMPACT_AFTER_RECORDS {
            if let Err(e) = self.compact(manifest) {
                warn!(error = %e, records = self.records, "Commit log compaction failed");
            }
        }
        Ok(())
    }

    fn write_record(&mut self, record: &[u8]) -> Result<()> {
        self.file.write_all(record)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replace the log with a single record holding `manifest`
    ///
    /// The handle is opened on the temporary file, so once the rename lands
    /// it already points at the new log. Until then the old log is untouched.
    fn compact(&mut self, manifest: &IndexManifest) -> Result<()> {
        let tmp = self.path.with_extension("log.tmp");
        let record = encode_record(manifest)?;
        let file = match write_compacted(&tmp, &record) {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(dropped = self.records - 1, "Compacted commit log");
        self.file = file;
        self.records = 1;
        self.len = record.len() as u64;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }
        Ok(())
    }
}

fn write_compacted(tmp: &Path, record: &[u8]) -> Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(tmp)?;
    file.write_all(record)?;
    file.sync_all()?;
    // later records go to the end
    drop(file);
    open_append(tmp)
}
