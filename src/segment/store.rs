//! Storage for segment files, deletes files and index metadata
//!
//! A persistent index directory looks like:
//! ```text
//! schema.json
//! settings.json
//! commits.log
//! writer.lock
//! segment_00000001/{terms.fst, terms.info, postings.bin, fast.bin, store.bin, deletes.<gen>.bin}
//! ```
//! An in-RAM store keeps nothing on disk; every write is a no-op and the
//! generation registry holds all segment data.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::commit_log::COMMIT_LOG_FILE;
use super::live_docs::LiveDocs;
use super::types::SegmentId;
use super::writer::{SegmentFiles, SegmentMeta};
use crate::error::{LoupeError, Result};

pub const SCHEMA_FILE: &str = "schema.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const LOCK_FILE: &str = "writer.lock";

const DELETES_PREFIX: &str = "deletes.";
const DELETES_SUFFIX: &str = ".bin";

/// Flush a directory entry so renames and new files survive a crash
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn deletes_file_name(generation: u64) -> String {
    format!("{}{}{}", DELETES_PREFIX, generation, DELETES_SUFFIX)
}

fn parse_deletes_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(DELETES_PREFIX)?
        .strip_suffix(DELETES_SUFFIX)?
        .parse()
        .ok()
}

#[derive(Clone, Debug)]
pub struct SegmentStore {
    root: Option<PathBuf>,
}

impl SegmentStore {
    pub fn in_ram() -> Self {
        Self { root: None }
    }

    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: Some(root.as_ref().to_path_buf()),
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.root.is_some()
    }

    pub fn commit_log_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join(COMMIT_LOG_FILE))
    }

    pub fn lock_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join(LOCK_FILE))
    }

    fn segment_dir(&self, root: &Path, id: SegmentId) -> PathBuf {
        root.join(id.dir_name())
    }

    /// Write every file of a segment and fsync it
    pub fn write_segment(&self, files: &SegmentFiles) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let dir = self.segment_dir(root, files.meta.id);
        fs::create_dir_all(&dir)?;
        for (name, bytes) in &files.files {
            write_synced(&dir.join(name), bytes)?;
        }
        sync_dir(&dir)?;
        sync_dir(root)?;
        debug!(segment = %files.meta.id, bytes = files.meta.size_bytes(), "Wrote segment files");
        Ok(())
    }

    /// Load the files named in `meta`; missing files are corruption
    pub fn read_segment(&self, meta: &SegmentMeta) -> Result<SegmentFiles> {
        let root = self.root.as_ref().ok_or_else(|| {
            LoupeError::Internal("in-RAM store has no segment files".to_string())
        })?;
        let dir = self.segment_dir(root, meta.id);
        let mut files = std::collections::BTreeMap::new();
        for name in meta.files.keys() {
            let bytes = fs::read(dir.join(name)).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    LoupeError::corrupt_segment(meta.id, format!("missing {}", name))
                }
                _ => LoupeError::Io(e),
            })?;
            files.insert(name.clone(), bytes);
        }
        Ok(SegmentFiles {
            meta: meta.clone(),
            files,
        })
    }

    pub fn write_deletes(&self, id: SegmentId, generation: u64, live: &LiveDocs) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let dir = self.segment_dir(root, id);
        write_synced(&dir.join(deletes_file_name(generation)), &live.serialize()?)?;
        sync_dir(&dir)?;
        Ok(())
    }

    pub fn read_deletes(&self, id: SegmentId, generation: u64) -> Result<LiveDocs> {
        let root = self.root.as_ref().ok_or_else(|| {
            LoupeError::Internal("in-RAM store has no deletes files".to_string())
        })?;
        let path = self.segment_dir(root, id).join(deletes_file_name(generation));
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                LoupeError::corrupt_segment(id, format!("missing deletes file for generation {}", generation))
            }
            _ => LoupeError::Io(e),
        })?;
        LiveDocs::deserialize(&bytes).map_err(|e| LoupeError::corrupt_segment(id, e.to_string()))
    }

    /// Drop deletes files of `id` other than the one for `keep`
    pub fn remove_stale_deletes(&self, id: SegmentId, keep: Option<u64>) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let dir = self.segment_dir(root, id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(generation) = name.to_str().and_then(parse_deletes_file_name) else {
                continue;
            };
            if Some(generation) != keep {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    pub fn remove_segment(&self, id: SegmentId) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        match fs::remove_dir_all(self.segment_dir(root, id)) {
            Ok(()) => {
                debug!(segment = %id, "Removed segment directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Segment directories present on disk
    pub fn list_segments(&self) -> Result<Vec<SegmentId>> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(SegmentId::from_dir_name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Write a metadata file via temp file and rename
    pub fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let tmp = root.join(format!("{}.tmp", name));
        write_synced(&tmp, bytes)?;
        fs::rename(&tmp, root.join(name))?;
        sync_dir(root)?;
        Ok(())
    }

    pub fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(root) = &self.root else {
            return Ok(None);
        };
        match fs::read(root.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::doc_store::DocStoreWriter;
    use crate::segment::writer::SegmentWriter;
    use tempfile::TempDir;

    fn files(id: u64) -> SegmentFiles {
        let mut store = DocStoreWriter::new();
        store.add(b"doc");
        SegmentWriter::new(SegmentId::new(id))
            .finish(1, Vec::new(), store.to_bytes())
            .unwrap()
    }

    #[test]
    fn test_segment_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path()).unwrap();
        let segment = files(4);
        store.write_segment(&segment).unwrap();
        assert_eq!(store.list_segments().unwrap(), vec![SegmentId::new(4)]);

        let back = store.read_segment(&segment.meta).unwrap();
        assert!(back.verify().is_ok());

        store.remove_segment(SegmentId::new(4)).unwrap();
        assert!(store.list_segments().unwrap().is_empty());
        let err = store.read_segment(&segment.meta).unwrap_err();
        assert!(matches!(err, LoupeError::CorruptSegment { .. }));
    }

    #[test]
    fn test_deletes_files() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path()).unwrap();
        store.write_segment(&files(1)).unwrap();

        let live = LiveDocs::from_deleted(1, [0u32].into_iter().collect());
        store.write_deletes(SegmentId::new(1), 2, &live).unwrap();
        store.write_deletes(SegmentId::new(1), 3, &live).unwrap();
        assert_eq!(store.read_deletes(SegmentId::new(1), 2).unwrap().num_alive(), 0);

        store.remove_stale_deletes(SegmentId::new(1), Some(3)).unwrap();
        assert!(store.read_deletes(SegmentId::new(1), 2).is_err());
        assert!(store.read_deletes(SegmentId::new(1), 3).is_ok());
    }

    #[test]
    fn test_in_ram_is_noop() {
        let store = SegmentStore::in_ram();
        assert!(!store.is_persistent());
        store.write_segment(&files(1)).unwrap();
        store.write_atomic(SCHEMA_FILE, b"{}").unwrap();
        assert!(store.read_file(SCHEMA_FILE).unwrap().is_none());
        assert!(store.list_segments().unwrap().is_empty());
    }

    #[test]
    fn test_atomic_metadata_write() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path()).unwrap();
        store.write_atomic(SETTINGS_FILE, b"one").unwrap();
        store.write_atomic(SETTINGS_FILE, b"two").unwrap();
        assert_eq!(store.read_file(SETTINGS_FILE).unwrap().unwrap(), b"two");
    }
}
