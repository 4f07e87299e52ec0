//! Mercurial working copy driven by the `hg` executable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use super::{SourceError, SourceRepository, redact_url, remove_if_exists};
use crate::exec::{Executable, ProcessExecutable};
use crate::fetch::{RetryPolicy, RetryableFetch};
use crate::types::{ChangeSet, RepositoryType};

pub struct HgRepository {
    path: PathBuf,
    hg: Arc<dyn Executable>,
    retry: RetryableFetch,
}

impl HgRepository {
    pub fn new(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        let path = path.into();
        let hg = Arc::new(ProcessExecutable::new("hg", &path).with_env("HGPLAIN", "1"));
        Self::with_executable(path, hg, policy)
    }

    pub fn with_executable(
        path: impl Into<PathBuf>,
        hg: Arc<dyn Executable>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            path: path.into(),
            hg,
            retry: RetryableFetch::mercurial(policy),
        }
    }

    fn recover(&self) -> anyhow::Result<()> {
        tracing::warn!(path = %self.path.display(), "running hg recover");
        self.hg.execute(&["recover"])?;
        Ok(())
    }
}

impl SourceRepository for HgRepository {
    fn repository_type(&self) -> RepositoryType {
        RepositoryType::Mercurial
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.join(".hg").is_dir()
    }

    fn initialize(&self) -> Result<(), SourceError> {
        std::fs::create_dir_all(&self.path).with_context(|| {
            format!("Failed to create repository directory: {}", self.path.display())
        })?;
        self.hg.execute(&["init"])?;
        tracing::info!(path = %self.path.display(), "initialized hg repository");
        Ok(())
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<(), SourceError> {
        tracing::info!(remote = %redact_url(remote), branch, "pulling");
        self.retry.run_with_recovery(
            branch,
            || self.hg.execute(&["pull", remote, "--branch", branch, "--noninteractive"]),
            || self.recover(),
        )?;
        self.hg.execute(&["update", "--clean", branch])?;
        Ok(())
    }

    fn update(&self, id: &str) -> Result<(), SourceError> {
        self.hg.execute(&["update", "--clean", id])?;
        Ok(())
    }

    fn current_id(&self) -> Result<Option<String>, SourceError> {
        let output = self.hg.execute(&["log", "-r", ".", "--template", "{node}"])?;
        let id = output.stdout.trim();
        // An empty repository reports the null revision.
        if id.is_empty() || id.chars().all(|c| c == '0') {
            return Ok(None);
        }
        Ok(Some(id.to_string()))
    }

    fn change_set(&self, id: &str) -> Result<ChangeSet, SourceError> {
        let output = self.hg.execute(&[
            "log",
            "-r",
            id,
            "--template",
            "{node}\\n{author}\\n{desc}",
        ])?;
        let mut lines = output.stdout.splitn(3, '\n');
        let node = lines.next().unwrap_or_default().trim();
        let author = lines.next().unwrap_or_default().trim();
        let message = lines.next().unwrap_or_default().trim();
        if node.is_empty() {
            return Err(anyhow::anyhow!("unknown revision '{}'", id).into());
        }
        Ok(ChangeSet::new(node, author, message))
    }

    fn clear_lock(&self) -> anyhow::Result<()> {
        remove_if_exists(&self.path.join(".hg").join("store").join("lock"))?;
        remove_if_exists(&self.path.join(".hg").join("wlock"))?;
        Ok(())
    }
}
