//! Single-writer advisory lock
//!
//! Within the process an atomic flag guards the index; across processes
//! an exclusive `flock` on `writer.lock` does. Both are acquired without
//! blocking.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{LoupeError, Result};

#[derive(Debug)]
pub(crate) struct WriterLock {
    held: AtomicBool,
    path: Option<PathBuf>,
}

impl WriterLock {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            held: AtomicBool::new(false),
            path,
        }
    }

    /// Take the lock or fail with `WriterBusy`
    pub fn acquire(self: &Arc<Self>) -> Result<WriterLease> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LoupeError::WriterBusy);
        }

        let file = match &self.path {
            Some(path) => match lock_file(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    self.held.store(false, Ordering::Release);
                    return Err(e);
                }
            },
            None => None,
        };
        debug!("Writer lock acquired");
        Ok(WriterLease {
            lock: self.clone(),
            file,
        })
    }
}

fn lock_file(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(LoupeError::WriterBusy),
        Err(e) => Err(LoupeError::Io(e)),
    }
}

/// Proof of holding the writer lock; released on drop
#[derive(Debug)]
pub(crate) struct WriterLease {
    lock: Arc<WriterLock>,
    file: Option<File>,
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                warn!(error = %e, "Failed to release writer lock file");
            }
        }
        self.lock.held.store(false, Ordering::Release);
        debug!("Writer lock released");
    }
}
