//! Operation locks guarding deployments and other exclusive work.
//!
//! This module provides the locking primitives used across hoist:
//! - [`OperationLock`]: the "try to become the sole owner" capability
//! - [`FileLock`]: cross-process lock backed by an OS file lock
//! - [`DeploymentLock`]: a file lock that clears stale source-control locks
//! - [`AsyncLockQueue`]: FIFO awaitable acquisition over any lock

mod deployment;
mod file_lock;
mod queue;

pub use deployment::{DeploymentLock, LockCleaner};
pub use file_lock::{FileLock, LockInfo};
pub use queue::{AsyncLockQueue, HeldLock, LockRequest};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Interval between acquisition attempts while waiting on a lock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from lock operations.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Release was called by a caller that does not own the lock.
    #[error("lock '{lock}' is not held by this process")]
    NotHeld { lock: String },

    /// `lock_async` was called before `initialize_async_locks`.
    #[error("async locks have not been initialized")]
    NotInitialized,

    /// `lock_async` was called after `terminate_async_locks`.
    #[error("async locks have been terminated")]
    Terminated,

    /// The lock was not acquired within the allowed time.
    #[error("timed out after {timeout:?} waiting for lock")]
    Timeout { timeout: Duration },

    /// A guarded operation could not run because the lock is held.
    #[error("cannot perform '{operation}': lock is held by another operation")]
    Contended { operation: String },

    /// The marker file could not be opened or locked.
    #[error("lock file I/O failed: {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    /// Contention is an expected outcome; everything else is a fault.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Timeout { .. } | LockError::Contended { .. })
    }
}

/// Capability to become the sole owner of a named resource.
pub trait OperationLock: Send + Sync {
    /// Whether the lock is currently held (by this handle or anyone else).
    fn is_held(&self) -> bool;

    /// Non-blocking acquisition; `Ok(true)` iff this call took ownership.
    fn try_lock(&self, operation: &str) -> Result<bool, LockError>;

    /// Give up ownership. Fails with [`LockError::NotHeld`] if not owned.
    fn release(&self) -> Result<(), LockError>;
}

impl<L: OperationLock + ?Sized> OperationLock for Arc<L> {
    fn is_held(&self) -> bool {
        (**self).is_held()
    }

    fn try_lock(&self, operation: &str) -> Result<bool, LockError> {
        (**self).try_lock(operation)
    }

    fn release(&self) -> Result<(), LockError> {
        (**self).release()
    }
}

/// Blocking helpers available on every [`OperationLock`].
pub trait OperationLockExt: OperationLock {
    /// Poll `try_lock` until acquired or `timeout` elapses.
    fn lock_within(&self, operation: &str, timeout: Duration) -> Result<bool, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_lock(operation)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(DEFAULT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Run `action` under the lock, or return `Ok(None)` without running it
    /// if the lock is not acquired within `timeout`.
    ///
    /// The lock is released on every exit path, including panics.
    fn try_lock_operation<T>(
        &self,
        operation: &str,
        timeout: Duration,
        action: impl FnOnce() -> T,
    ) -> Result<Option<T>, LockError> {
        if !self.lock_within(operation, timeout)? {
            tracing::debug!(operation, ?timeout, "lock not acquired");
            return Ok(None);
        }

        let guard = ReleaseGuard::new(self);
        let value = action();
        guard.release()?;
        Ok(Some(value))
    }

    /// Like [`try_lock_operation`](Self::try_lock_operation) but reports a
    /// timeout as [`LockError::Contended`].
    fn lock_operation<T>(
        &self,
        operation: &str,
        timeout: Duration,
        action: impl FnOnce() -> T,
    ) -> Result<T, LockError> {
        self.try_lock_operation(operation, timeout, action)?
            .ok_or_else(|| LockError::Contended {
                operation: operation.to_string(),
            })
    }
}

impl<L: OperationLock + ?Sized> OperationLockExt for L {}

/// Releases a held lock when dropped unless released explicitly.
struct ReleaseGuard<'a, L: OperationLock + ?Sized> {
    lock: &'a L,
    released: bool,
}

impl<'a, L: OperationLock + ?Sized> ReleaseGuard<'a, L> {
    fn new(lock: &'a L) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.lock.release()
    }
}

impl<L: OperationLock + ?Sized> Drop for ReleaseGuard<'_, L> {
    fn drop(&mut self) {
        if !self.released
            && let Err(err) = self.lock.release()
        {
            tracing::error!(error = %err, "failed to release lock after aborted operation");
        }
    }
}
