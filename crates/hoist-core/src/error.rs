//! Errors surfaced by deployment operations.

use crate::fetch::FetchError;
use crate::lock::LockError;
use crate::source::SourceError;
use crate::status::StoreError;

/// Coarse category of a [`DeployError`], for mapping onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Another operation holds the resource.
    Conflict,
    /// The referenced deployment does not exist.
    NotFound,
    /// May succeed if tried again.
    Transient,
    /// Will fail again without a change in input.
    Permanent,
    /// Local I/O or state corruption.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A deployment is running, or the target is the active deployment.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deployment '{id}' not found")]
    NotFound { id: String },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Preparing sources or running the build infrastructure failed.
    #[error("{message}")]
    Build {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DeployError {
    pub fn build(message: impl Into<String>, source: anyhow::Error) -> Self {
        DeployError::Build {
            message: message.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::Conflict(_) => ErrorKind::Conflict,
            DeployError::NotFound { .. } => ErrorKind::NotFound,
            DeployError::Lock(err) if err.is_contention() => ErrorKind::Conflict,
            DeployError::Lock(_) => ErrorKind::Internal,
            DeployError::Fetch(err) if err.is_retryable() => ErrorKind::Transient,
            DeployError::Fetch(_) => ErrorKind::Permanent,
            DeployError::Store(StoreError::Lock(err)) if err.is_contention() => ErrorKind::Transient,
            DeployError::Store(_) => ErrorKind::Internal,
            DeployError::Build { .. } => ErrorKind::Permanent,
            DeployError::Config(_) => ErrorKind::Permanent,
        }
    }
}

impl From<SourceError> for DeployError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Fetch(err) => DeployError::Fetch(err),
            SourceError::Command(err) => DeployError::Fetch(FetchError::Command(err)),
            SourceError::Lock(err) => DeployError::Lock(err),
            SourceError::NotConfigured => {
                DeployError::Config("no source repository is configured".to_string())
            }
            SourceError::Git(err) => DeployError::build("source repository error", err.into()),
            SourceError::Other(err) => DeployError::build("source repository error", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandError;

    #[test]
    fn kinds() {
        assert_eq!(DeployError::Conflict("busy".into()).kind(), ErrorKind::Conflict);
        assert_eq!(
            DeployError::NotFound { id: "abc".into() }.kind(),
            ErrorKind::NotFound
        );

        let transient = FetchError::Command(CommandError::new("fatal: HTTP request failed"));
        assert_eq!(DeployError::from(transient).kind(), ErrorKind::Transient);

        let permanent = FetchError::Command(CommandError::new("fatal: not a git repository"));
        assert_eq!(DeployError::from(permanent).kind(), ErrorKind::Permanent);

        let contended = LockError::Contended {
            operation: "delete".into(),
        };
        assert_eq!(DeployError::from(contended).kind(), ErrorKind::Conflict);
        assert_eq!(
            DeployError::from(LockError::Terminated).kind(),
            ErrorKind::Internal
        );
    }
}
