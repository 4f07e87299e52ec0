//! Source-control fetches that survive transient failures.
//!
//! [`RetryableFetch`] runs one fetch attempt at a time, classifies each
//! failure with a [`FailureClassifier`] and decides whether to retry, run a
//! recovery step first, or give up.

mod classify;
mod retry;

pub use classify::{
    FailureClassifier, FailureKind, FailurePattern, GIT_PATTERNS, HG_PATTERNS, MatchRule,
};
pub use retry::{FetchAttempt, RetryPolicy, RetryableFetch};

use crate::exec::CommandError;

/// A fetch that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The requested branch does not exist in the remote.
    #[error("branch '{branch}' was not found in the remote repository")]
    BranchNotFound {
        branch: String,
        #[source]
        source: CommandError,
    },

    /// The source-control tool failed; carries its output unchanged.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The recovery step itself failed.
    #[error("failed to recover repository after: {failure}")]
    Recovery {
        failure: String,
        #[source]
        source: anyhow::Error,
    },
}

impl FetchError {
    pub fn is_branch_not_found(&self) -> bool {
        matches!(self, FetchError::BranchNotFound { .. })
    }

    /// Whether a later attempt might succeed (network-level failures).
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Command(error) => {
                let git = FailureClassifier::git().classify(error);
                let hg = FailureClassifier::mercurial().classify(error);
                git == FailureKind::Transient || hg == FailureKind::Transient
            }
            FetchError::BranchNotFound { .. } | FetchError::Recovery { .. } => false,
        }
    }

    /// The underlying command failure, if any.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            FetchError::BranchNotFound { source, .. } => Some(source),
            FetchError::Command(error) => Some(error),
            FetchError::Recovery { .. } => None,
        }
    }
}
