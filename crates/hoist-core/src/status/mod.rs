//! Persistent deployment history.

mod file_store;
mod log;

pub use file_store::FileStatusStore;
pub use log::{DeploymentLogger, LogEntry, LogLevel};

use crate::lock::LockError;
use crate::types::DeployResult;

/// Errors from a [`StatusStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("status store unavailable: {0}")]
    Lock(#[from] LockError),

    #[error("invalid deployment id '{0}'")]
    InvalidId(String),

    #[error("failed to access {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage for deployment results and the active-deployment pointer.
pub trait StatusStore: Send + Sync {
    /// Every recorded result, most recent first, with `current` set.
    fn get_all(&self) -> Result<Vec<DeployResult>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<DeployResult>, StoreError>;

    /// Record `result` unless its id already exists; `Ok(true)` if written.
    fn create(&self, result: &DeployResult) -> Result<bool, StoreError>;

    /// Insert or overwrite.
    fn save(&self, result: &DeployResult) -> Result<(), StoreError>;

    /// Remove a result and its log. Deleting a missing id succeeds.
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    fn active_deployment_id(&self) -> Result<Option<String>, StoreError>;

    fn set_active_deployment_id(&self, id: Option<&str>) -> Result<(), StoreError>;
}

/// Deployment ids become directory names: `[A-Za-z0-9._-]`, not `.` or `..`.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}
