//! Configuration schema for hoist.toml

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::fetch::RetryPolicy;
use crate::retention::{MAX_SUCCESS_DEPLOYMENT_RESULTS, RetentionPolicy};
use crate::types::RepositoryType;

/// Root configuration structure for hoist.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Branch deployed from the remote repository
    pub branch: String,
    pub repository_type: RepositoryType,
    /// Default remote; requests may override it
    pub repository_url: Option<String>,
    /// Fetch with `--depth 1` into an empty repository
    pub allow_shallow_clones: bool,
    pub retry: RetrySettings,
    pub lock: LockSettings,
    pub retention: RetentionSettings,
    pub build: BuildSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            branch: "master".to_string(),
            repository_type: RepositoryType::Git,
            repository_url: None,
            allow_shallow_clones: false,
            retry: RetrySettings::default(),
            lock: LockSettings::default(),
            retention: RetentionSettings::default(),
            build: BuildSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Re-check interval for queued deployment requests
    pub poll_interval_ms: u64,
    /// How long status reads and writes wait for the status lock
    pub status_timeout_secs: u64,
    /// How long repository initialization waits for its lock
    pub repository_timeout_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            status_timeout_secs: 60,
            repository_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub max_success_results: usize,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_success_results: MAX_SUCCESS_DEPLOYMENT_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Shell command run in the source directory before syncing
    pub command: Option<String>,
    /// Deployment target; relative paths resolve against the site root
    pub target_dir: Option<String>,
}

impl Settings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.delay_ms),
        )
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.retention.max_success_results)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock.poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.status_timeout_secs)
    }

    pub fn repository_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.repository_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.branch.trim().is_empty() {
            anyhow::bail!("branch must not be empty");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.lock.poll_interval_ms == 0 {
            anyhow::bail!("lock.poll_interval_ms must be greater than zero");
        }
        if let Some(url) = &self.repository_url {
            crate::source::validate_repository_url(url)
                .with_context(|| format!("Invalid repository_url: '{}'", url))?;
        }
        if let Some(command) = &self.build.command
            && command.trim().is_empty()
        {
            anyhow::bail!("build.command must not be empty when set");
        }
        Ok(())
    }
}
