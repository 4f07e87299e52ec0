//! Shared deployment types used by the store, the orchestrator and the CLI.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeployStatus {
    /// Recorded, not started yet.
    Pending,
    /// Build step running.
    Building,
    /// Build output being copied to the target.
    Deploying,
    /// Finished unsuccessfully.
    Failed,
    /// Finished successfully.
    Success,
}

impl DeployStatus {
    /// Pending, Building and Deploying: the attempt has not finished.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            DeployStatus::Pending | DeployStatus::Building | DeployStatus::Deploying
        )
    }

    pub fn is_complete(self) -> bool {
        !self.is_in_progress()
    }
}

impl std::fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeployStatus::Pending => "pending",
            DeployStatus::Building => "building",
            DeployStatus::Deploying => "deploying",
            DeployStatus::Failed => "failed",
            DeployStatus::Success => "success",
        };
        f.write_str(label)
    }
}

/// Persisted record of one deployment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployResult {
    /// Change set id (commit id or content hash), or a generated id while temporary
    pub id: String,
    pub status: DeployStatus,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub deployer: String,
    #[serde(default)]
    pub message: String,
    /// Placeholder recorded before the change set id is known
    #[serde(default)]
    pub is_temporary: bool,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// End time of the most recent successful run of this id
    #[serde(default)]
    pub last_success_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub complete: bool,
    /// Whether this is the active deployment; derived on read
    #[serde(default, skip_deserializing)]
    pub current: bool,
}

impl DeployResult {
    pub fn new(id: impl Into<String>, status: DeployStatus) -> Self {
        Self {
            id: id.into(),
            status,
            status_text: String::new(),
            author: String::new(),
            deployer: String::new(),
            message: String::new(),
            is_temporary: false,
            start_time: Utc::now(),
            end_time: None,
            last_success_end_time: None,
            complete: status.is_complete(),
            current: false,
        }
    }

    /// A pending placeholder shown to pollers until the fetch completes.
    pub fn temporary(id: impl Into<String>, deployer: &str, message: &str) -> Self {
        let mut result = Self::new(id, DeployStatus::Pending);
        result.is_temporary = true;
        result.deployer = deployer.to_string();
        result.message = message.to_string();
        result.status_text = "Receiving changes.".to_string();
        result
    }

    /// Move to `status`, stamping the end time when it is terminal.
    pub fn transition(&mut self, status: DeployStatus, text: impl Into<String>) {
        self.status = status;
        self.status_text = text.into();
        self.complete = status.is_complete();
        if self.complete {
            let now = Utc::now();
            self.end_time = Some(now);
            if status == DeployStatus::Success {
                self.last_success_end_time = Some(now);
            }
        }
    }
}

/// What a fetch produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: String,
    pub author: String,
    pub message: String,
    #[serde(default)]
    pub is_temporary: bool,
}

impl ChangeSet {
    pub fn new(id: impl Into<String>, author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            message: message.into(),
            is_temporary: false,
        }
    }
}

/// Source-control system backing the site repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    #[default]
    Git,
    #[serde(rename = "hg", alias = "mercurial")]
    Mercurial,
    /// No repository; only zip uploads are accepted
    None,
}

impl std::fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryType::Git => f.write_str("git"),
            RepositoryType::Mercurial => f.write_str("hg"),
            RepositoryType::None => f.write_str("none"),
        }
    }
}

/// Where the content of a deployment comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeploymentSource {
    /// Fetch from the configured (or given) remote repository.
    Repository {
        repo_url: Option<String>,
        branch: Option<String>,
        commit_id: Option<String>,
    },
    /// Deploy the contents of a zip archive.
    Zip { archive: PathBuf },
    /// Re-run a change set that is already in the local repository.
    Existing { id: String },
}

/// A trigger for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub source: DeploymentSource,
    pub deployer: String,
    pub author: Option<String>,
    pub message: Option<String>,
    /// Triggered by a push hook; skipped when nothing changed
    pub is_continuous: bool,
    /// May be re-run when further requests arrived while it was running
    pub is_reusable: bool,
}

impl DeploymentRequest {
    pub fn new(source: DeploymentSource) -> Self {
        Self {
            source,
            deployer: "hoist".to_string(),
            author: None,
            message: None,
            is_continuous: false,
            is_reusable: false,
        }
    }

    pub fn repository() -> Self {
        Self::new(DeploymentSource::Repository {
            repo_url: None,
            branch: None,
            commit_id: None,
        })
    }

    pub fn zip(archive: impl Into<PathBuf>) -> Self {
        Self::new(DeploymentSource::Zip {
            archive: archive.into(),
        })
    }

    pub fn existing(id: impl Into<String>) -> Self {
        Self::new(DeploymentSource::Existing { id: id.into() })
    }

    pub fn with_deployer(mut self, deployer: impl Into<String>) -> Self {
        self.deployer = deployer.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn continuous(mut self) -> Self {
        self.is_continuous = true;
        self.is_reusable = true;
        self
    }

    pub fn reusable(mut self, reusable: bool) -> Self {
        self.is_reusable = reusable;
        self
    }
}

/// How `request_deployment` waits for the deployment lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Fail with a conflict if a deployment is already running.
    #[default]
    Synchronous,
    /// Queue behind the running deployment and return immediately.
    Queued,
}

/// Caller-facing result of `request_deployment`.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentResponse {
    /// Queued; poll the history for the given placeholder id.
    Accepted { id: String },
    /// Ran to completion (successfully or not).
    Completed(DeployResult),
    /// Nothing to deploy (branch missing or already active).
    NoChange,
    /// Another deployment holds the lock.
    Conflict,
}
