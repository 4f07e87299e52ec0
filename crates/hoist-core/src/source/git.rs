//! Git working copy driven by the `git` executable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use git2::{ErrorCode, Repository};

use super::{SourceError, SourceRepository, redact_url, remove_if_exists};
use crate::exec::{Executable, ProcessExecutable};
use crate::fetch::{RetryPolicy, RetryableFetch};
use crate::types::{ChangeSet, RepositoryType};

/// Fetches run through the `git` CLI so that credential helpers and SSH
/// configuration apply; inspection goes through `git2`.
pub struct GitRepository {
    path: PathBuf,
    git: Arc<dyn Executable>,
    retry: RetryableFetch,
    allow_shallow_clones: bool,
}

impl GitRepository {
    pub fn new(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        let path = path.into();
        let git = Arc::new(ProcessExecutable::new("git", &path));
        Self::with_executable(path, git, policy)
    }

    pub fn with_executable(
        path: impl Into<PathBuf>,
        git: Arc<dyn Executable>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            path: path.into(),
            git,
            retry: RetryableFetch::git(policy),
            allow_shallow_clones: false,
        }
    }

    pub fn allow_shallow_clones(mut self, allow: bool) -> Self {
        self.allow_shallow_clones = allow;
        self
    }

    fn open(&self) -> Result<Repository, SourceError> {
        Ok(Repository::open(&self.path)?)
    }

    fn is_empty(&self) -> Result<bool, SourceError> {
        Ok(self.open()?.is_empty()?)
    }

    fn git_dir(&self) -> PathBuf {
        self.path.join(".git")
    }
}

impl SourceRepository for GitRepository {
    fn repository_type(&self) -> RepositoryType {
        RepositoryType::Git
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.git_dir().is_dir()
    }

    fn initialize(&self) -> Result<(), SourceError> {
        std::fs::create_dir_all(&self.path).with_context(|| {
            format!("Failed to create repository directory: {}", self.path.display())
        })?;
        let repo = Repository::init(&self.path)?;
        let mut config = repo.config()?;
        config.set_bool("core.autocrlf", false)?;
        tracing::info!(path = %self.path.display(), "initialized git repository");
        Ok(())
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<(), SourceError> {
        tracing::info!(remote = %redact_url(remote), branch, "fetching");

        // A missing origin is expected on first fetch.
        let _ = self.git.execute(&["remote", "rm", "origin"]);
        self.git.execute(&["remote", "add", "origin", remote])?;

        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        let mut args = vec!["fetch", "origin", refspec.as_str(), "--progress"];
        if self.allow_shallow_clones && self.is_empty()? {
            args.extend(["--depth", "1"]);
        }

        self.retry
            .run_with_recovery(branch, || self.git.execute(&args), || self.clear_lock())?;

        let local_ref = format!("refs/heads/{branch}");
        let remote_ref = format!("origin/{branch}");
        self.git.execute(&["update-ref", &local_ref, &remote_ref])?;
        self.git.execute(&["checkout", branch, "--force"])?;
        Ok(())
    }

    fn update(&self, id: &str) -> Result<(), SourceError> {
        self.git.execute(&["checkout", id, "--force"])?;
        Ok(())
    }

    fn current_id(&self) -> Result<Option<String>, SourceError> {
        let repo = self.open()?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Some(head.peel_to_commit()?.id().to_string()))
    }

    fn change_set(&self, id: &str) -> Result<ChangeSet, SourceError> {
        let repo = self.open()?;
        let commit = repo.revparse_single(id)?.peel_to_commit()?;
        let author = commit.author();
        Ok(ChangeSet::new(
            commit.id().to_string(),
            author.name().unwrap_or_default(),
            commit.message().unwrap_or_default().trim(),
        ))
    }

    fn clear_lock(&self) -> anyhow::Result<()> {
        let git_dir = self.git_dir();
        remove_if_exists(&git_dir.join("index.lock"))?;
        remove_if_exists(&git_dir.join("HEAD.lock"))?;

        let heads = git_dir.join("refs").join("heads");
        if heads.is_dir() {
            for entry in std::fs::read_dir(&heads)
                .with_context(|| format!("Failed to read {}", heads.display()))?
            {
                let path = entry?.path();
                if path.extension().is_some_and(|ext| ext == "lock") {
                    remove_if_exists(&path)?;
                }
            }
        }
        Ok(())
    }
}
