//! Cross-process lock backed by an exclusive OS lock on a marker file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::{LockError, OperationLock};

/// Diagnostic record written into the lock file by the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Name of the operation holding the lock
    pub operation: String,
    /// Process id of the holder
    pub pid: u32,
    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,
}

/// Lock file shared by every process on the host.
///
/// Ownership is an exclusive advisory lock on the file, so a crashed holder
/// never leaves the lock stuck: the OS drops the lock with the process. The
/// file itself is left in place on release; removing it would let two
/// processes lock different inodes under the same path.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read what the current holder recorded, if anything.
    pub fn lock_info(&self) -> anyhow::Result<Option<LockInfo>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read lock file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let info = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse lock file: {}", self.path.display()))?;
        Ok(Some(info))
    }

    fn handle(&self) -> MutexGuard<'_, Option<File>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn open(&self, create: bool) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(&self.path)
    }

    fn write_info(file: &mut File, operation: &str) -> anyhow::Result<()> {
        let info = LockInfo {
            operation: operation.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&info).context("Failed to serialize lock info")?;
        file.set_len(0)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl OperationLock for FileLock {
    fn is_held(&self) -> bool {
        let handle = self.handle();
        if handle.is_some() {
            return true;
        }
        drop(handle);

        // Holders record their info on acquisition and clear it on release, so
        // an empty file needs no OS check.
        if matches!(self.lock_info(), Ok(None)) {
            return false;
        }

        // Stale info from a crashed holder carries no OS lock. A shared check
        // only conflicts with an exclusive holder.
        match self.open(false) {
            Ok(file) => match FileExt::try_lock_shared(&file) {
                Ok(()) => {
                    let _ = FileExt::unlock(&file);
                    false
                }
                Err(err) => is_contended(&err),
            },
            Err(_) => false,
        }
    }

    fn try_lock(&self, operation: &str) -> Result<bool, LockError> {
        let mut handle = self.handle();
        if handle.is_some() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }

        let mut file = self.open(true).map_err(|err| self.io_error(err))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if is_contended(&err) => return Ok(false),
            Err(err) => return Err(self.io_error(err)),
        }

        if let Err(err) = Self::write_info(&mut file, operation) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to record lock info");
        }

        tracing::debug!(path = %self.path.display(), operation, "lock acquired");
        *handle = Some(file);
        Ok(true)
    }

    fn release(&self) -> Result<(), LockError> {
        let mut handle = self.handle();
        let Some(file) = handle.take() else {
            return Err(LockError::NotHeld {
                lock: self.path.display().to_string(),
            });
        };

        if let Err(err) = file.set_len(0) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to clear lock info");
        }
        // Closing the handle drops the OS lock even if unlock itself fails.
        if let Err(err) = FileExt::unlock(&file) {
            tracing::warn!(path = %self.path.display(), error = %err, "explicit unlock failed");
        }
        drop(file);

        tracing::debug!(path = %self.path.display(), "lock released");
        Ok(())
    }
}
