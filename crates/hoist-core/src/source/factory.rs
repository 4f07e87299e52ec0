//! Shared access to the site repository.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{GitRepository, HgRepository, SourceError, SourceRepository};
use crate::config::{Environment, Settings};
use crate::lock::{FileLock, LockCleaner, OperationLockExt};
use crate::types::RepositoryType;

/// Hands out the site's single repository, creating it on first use.
///
/// Creation runs under its own file lock, so concurrent callers (threads or
/// processes) initialize at most once and all observe the same repository.
pub struct RepositoryFactory {
    repository: Option<Arc<dyn SourceRepository>>,
    init_lock: FileLock,
    timeout: Duration,
}

impl RepositoryFactory {
    pub fn new(environment: &Environment, settings: &Settings) -> Self {
        let path = environment.repository_path();
        let policy = settings.retry_policy();
        let repository: Option<Arc<dyn SourceRepository>> = match settings.repository_type {
            RepositoryType::Git => Some(Arc::new(
                GitRepository::new(path, policy).allow_shallow_clones(settings.allow_shallow_clones),
            )),
            RepositoryType::Mercurial => Some(Arc::new(HgRepository::new(path, policy))),
            RepositoryType::None => None,
        };
        Self {
            repository,
            init_lock: FileLock::new(environment.repository_lock_path()),
            timeout: settings.repository_timeout(),
        }
    }

    /// Wrap an existing repository implementation.
    pub fn with_repository(
        repository: Arc<dyn SourceRepository>,
        lock_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            repository: Some(repository),
            init_lock: FileLock::new(lock_path),
            timeout,
        }
    }

    pub fn repository_type(&self) -> RepositoryType {
        self.repository
            .as_ref()
            .map(|repo| repo.repository_type())
            .unwrap_or(RepositoryType::None)
    }

    /// The repository, if one is configured, without creating it.
    pub fn repository(&self) -> Option<Arc<dyn SourceRepository>> {
        self.repository.clone()
    }

    /// The repository, initialized if it does not exist yet.
    pub fn ensure_repository(&self) -> Result<Arc<dyn SourceRepository>, SourceError> {
        let repository = self.repository.clone().ok_or(SourceError::NotConfigured)?;
        if repository.exists() {
            return Ok(repository);
        }

        self.init_lock
            .lock_operation("repository:init", self.timeout, || {
                if repository.exists() {
                    return Ok(());
                }
                tracing::info!(path = %repository.path().display(), kind = %repository.repository_type(), "creating repository");
                repository.initialize()
            })??;
        Ok(repository)
    }
}

impl LockCleaner for RepositoryFactory {
    fn clear_lock(&self) -> anyhow::Result<()> {
        match &self.repository {
            Some(repository) if repository.exists() => repository.clear_lock(),
            _ => Ok(()),
        }
    }
}
