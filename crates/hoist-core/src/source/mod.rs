//! Source repositories a deployment is fetched from.
//!
//! - [`SourceRepository`]: what the orchestrator needs from a working copy
//! - [`GitRepository`] / [`HgRepository`]: drive the `git` / `hg` executables
//! - [`RepositoryFactory`]: one shared repository, initialized at most once
//! - [`extract_archive`]: zip uploads

mod archive;
mod factory;
mod git;
mod hg;

pub use archive::extract_archive;
pub use factory::RepositoryFactory;
pub use git::GitRepository;
pub use hg::HgRepository;

use std::path::Path;

use anyhow::Context;

use crate::exec::CommandError;
use crate::fetch::FetchError;
use crate::lock::LockError;
use crate::types::{ChangeSet, RepositoryType};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("repository error: {0}")]
    Git(#[from] git2::Error),

    #[error("repository lock unavailable: {0}")]
    Lock(#[from] LockError),

    #[error("no source repository is configured")]
    NotConfigured,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A local working copy of the site's source.
pub trait SourceRepository: Send + Sync {
    fn repository_type(&self) -> RepositoryType;

    fn path(&self) -> &Path;

    fn exists(&self) -> bool;

    /// Create an empty repository at [`path`](Self::path).
    fn initialize(&self) -> Result<(), SourceError>;

    /// Fetch `branch` from `remote` and check it out, retrying transient failures.
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), SourceError>;

    /// Check out a specific change set.
    fn update(&self, id: &str) -> Result<(), SourceError>;

    /// Id of the checked-out change set; `None` for an empty repository.
    fn current_id(&self) -> Result<Option<String>, SourceError>;

    fn change_set(&self, id: &str) -> Result<ChangeSet, SourceError>;

    /// Remove lock files a crashed tool left behind.
    fn clear_lock(&self) -> anyhow::Result<()>;
}

/// Accepts URLs with a scheme, scp-style `user@host:path` remotes and local paths.
pub fn validate_repository_url(value: &str) -> anyhow::Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("repository URL is empty");
    }
    if value.contains("://") {
        url::Url::parse(value).with_context(|| format!("Malformed URL: {}", value))?;
    }
    Ok(())
}

/// Hide credentials embedded in a remote URL before logging it.
pub fn redact_url(value: &str) -> String {
    match url::Url::parse(value) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => value.to_string(),
    }
}

fn remove_if_exists(path: &Path) -> anyhow::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::warn!(path = %path.display(), "removed stale lock file");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
