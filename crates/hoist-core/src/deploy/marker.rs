//! Marker file recording that a deployment was requested while one was running.

use std::path::{Path, PathBuf};

use anyhow::Context;
use filetime::FileTime;

/// A file whose modification time changes on every rejected request.
///
/// The running deployment compares the time before and after its run; a
/// change means newer content may be waiting and the run repeats.
#[derive(Debug, Clone)]
pub struct PendingMarker {
    path: PathBuf,
}

impl PendingMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_modified(&self) -> Option<FileTime> {
        std::fs::metadata(&self.path)
            .ok()
            .map(|meta| FileTime::from_last_modification_time(&meta))
    }

    /// Create the marker or advance its modification time.
    pub fn touch(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let previous = self.last_modified();
        if previous.is_none() {
            std::fs::write(&self.path, b"")
                .with_context(|| format!("Failed to create marker: {}", self.path.display()))?;
        }

        // Coarse filesystem clocks could otherwise report an unchanged time.
        let mut stamp = FileTime::now();
        if let Some(previous) = previous
            && stamp <= previous
        {
            stamp = FileTime::from_unix_time(previous.unix_seconds() + 1, previous.nanoseconds());
        }
        filetime::set_file_mtime(&self.path, stamp)
            .with_context(|| format!("Failed to touch marker: {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "pending marker touched");
        Ok(())
    }
}
