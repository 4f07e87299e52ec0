//! Deployment-wide lock that repairs the repository on acquisition.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::{FileLock, LockError, LockInfo, OperationLock};

/// Removes lock files a crashed source-control process left behind.
pub trait LockCleaner: Send + Sync {
    fn clear_lock(&self) -> anyhow::Result<()>;
}

/// File lock for deployments.
///
/// Whoever holds the deployment lock is the only writer of the repository, so
/// any `index.lock`-style files present at acquisition time are stale and get
/// cleared before the holder proceeds.
pub struct DeploymentLock {
    inner: FileLock,
    cleaner: RwLock<Option<Arc<dyn LockCleaner>>>,
}

impl DeploymentLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: FileLock::new(path),
            cleaner: RwLock::new(None),
        }
    }

    /// Attach the repository cleaner run after every acquisition.
    pub fn with_cleaner(self, cleaner: Arc<dyn LockCleaner>) -> Self {
        self.set_cleaner(Some(cleaner));
        self
    }

    pub fn set_cleaner(&self, cleaner: Option<Arc<dyn LockCleaner>>) {
        let mut slot = self
            .cleaner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = cleaner;
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn lock_info(&self) -> anyhow::Result<Option<LockInfo>> {
        self.inner.lock_info()
    }

    fn clear_repository_locks(&self) {
        let cleaner = self
            .cleaner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(cleaner) = cleaner
            && let Err(err) = cleaner.clear_lock()
        {
            tracing::warn!(error = %err, "failed to clear stale repository locks");
        }
    }
}

impl std::fmt::Debug for DeploymentLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentLock")
            .field("path", &self.inner.path())
            .finish_non_exhaustive()
    }
}

impl OperationLock for DeploymentLock {
    fn is_held(&self) -> bool {
        self.inner.is_held()
    }

    fn try_lock(&self, operation: &str) -> Result<bool, LockError> {
        let acquired = self.inner.try_lock(operation)?;
        if acquired {
            self.clear_repository_locks();
        }
        Ok(acquired)
    }

    fn release(&self) -> Result<(), LockError> {
        self.inner.release()
    }
}
