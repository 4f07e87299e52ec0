//! Site directory layout.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Filesystem layout of one site.
///
/// ```text
/// <root>/
///   hoist.toml
///   repository/          working copy
///   deployments/<id>/    status.json, log.json
///   deployments/active   id of the active deployment
///   deployments/pending  marker touched by rejected requests
///   locks/               deployment.lock, status.lock, repository.lock
///   wwwroot/             default deployment target
///   zipdeploy/extracted  unpacked zip uploads
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    root: PathBuf,
}

impl Environment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Site root under the user state directory.
    pub fn default_root() -> anyhow::Result<PathBuf> {
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| anyhow::anyhow!("Could not determine state directory"))?;
        Ok(base.join("hoist"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("hoist.toml")
    }

    pub fn repository_path(&self) -> PathBuf {
        self.root.join("repository")
    }

    pub fn deployments_path(&self) -> PathBuf {
        self.root.join("deployments")
    }

    pub fn deployment_path(&self, id: &str) -> PathBuf {
        self.deployments_path().join(id)
    }

    pub fn active_deployment_path(&self) -> PathBuf {
        self.deployments_path().join("active")
    }

    pub fn pending_marker_path(&self) -> PathBuf {
        self.deployments_path().join("pending")
    }

    pub fn locks_path(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn deployment_lock_path(&self) -> PathBuf {
        self.locks_path().join("deployment.lock")
    }

    pub fn status_lock_path(&self) -> PathBuf {
        self.locks_path().join("status.lock")
    }

    pub fn repository_lock_path(&self) -> PathBuf {
        self.locks_path().join("repository.lock")
    }

    pub fn webroot_path(&self) -> PathBuf {
        self.root.join("wwwroot")
    }

    pub fn zip_extract_path(&self) -> PathBuf {
        self.root.join("zipdeploy").join("extracted")
    }

    /// Resolve a configured target directory against the site root.
    pub fn target_path(&self, configured: Option<&str>) -> PathBuf {
        match configured {
            Some(dir) => self.root.join(dir),
            None => self.webroot_path(),
        }
    }

    /// Create the directories every service expects.
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        for dir in [
            self.deployments_path(),
            self.locks_path(),
            self.webroot_path(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}
