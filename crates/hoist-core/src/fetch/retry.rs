//! Bounded retry loop driven by failure classification.

use std::thread;
use std::time::Duration;

use super::{FailureClassifier, FailureKind, FetchError};
use crate::exec::CommandError;

/// How many times to try a fetch and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// One failed iteration of the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchAttempt {
    pub number: u32,
    pub failure: FailureKind,
    pub recovered: bool,
}

/// Runs a fetch, retrying transient failures per its [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryableFetch {
    classifier: FailureClassifier,
    policy: RetryPolicy,
}

impl RetryableFetch {
    pub fn new(classifier: FailureClassifier, policy: RetryPolicy) -> Self {
        Self { classifier, policy }
    }

    pub fn git(policy: RetryPolicy) -> Self {
        Self::new(FailureClassifier::git(), policy)
    }

    pub fn mercurial(policy: RetryPolicy) -> Self {
        Self::new(FailureClassifier::mercurial(), policy)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    /// Run `fetch` for `branch` with no recovery step.
    pub fn run<T>(
        &self,
        branch: &str,
        fetch: impl FnMut() -> Result<T, CommandError>,
    ) -> Result<T, FetchError> {
        self.execute(branch, fetch, None::<fn() -> anyhow::Result<()>>)
    }

    /// Run `fetch` for `branch`, calling `recover` once when a failure
    /// needs repository repair before retrying.
    pub fn run_with_recovery<T>(
        &self,
        branch: &str,
        fetch: impl FnMut() -> Result<T, CommandError>,
        recover: impl FnMut() -> anyhow::Result<()>,
    ) -> Result<T, FetchError> {
        self.execute(branch, fetch, Some(recover))
    }

    fn execute<T, F, R>(
        &self,
        branch: &str,
        mut fetch: F,
        mut recover: Option<R>,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Result<T, CommandError>,
        R: FnMut() -> anyhow::Result<()>,
    {
        let mut recovered = false;
        let mut number = 0;

        loop {
            number += 1;
            let error = match fetch() {
                Ok(value) => {
                    tracing::debug!(branch, attempt = number, "fetch succeeded");
                    return Ok(value);
                }
                Err(error) => error,
            };

            let failure = self.classifier.classify(&error);
            let exhausted = number >= self.policy.max_attempts;

            match failure {
                FailureKind::BranchNotFound => {
                    tracing::info!(branch, "branch not found upstream");
                    return Err(FetchError::BranchNotFound {
                        branch: branch.to_string(),
                        source: error,
                    });
                }
                FailureKind::Permanent => {
                    tracing::warn!(branch, attempt = number, error = %error, "fetch failed");
                    return Err(error.into());
                }
                FailureKind::NeedsRecovery if recover.is_some() => {
                    if recovered || exhausted {
                        tracing::warn!(branch, attempt = number, error = %error, "fetch failed after recovery");
                        return Err(error.into());
                    }
                    if let Some(recover) = recover.as_mut() {
                        recover().map_err(|source| FetchError::Recovery {
                            failure: error.message().to_string(),
                            source,
                        })?;
                    }
                    recovered = true;
                }
                FailureKind::Transient | FailureKind::NeedsRecovery => {
                    if exhausted {
                        tracing::warn!(branch, attempts = number, error = %error, "fetch retries exhausted");
                        return Err(error.into());
                    }
                }
            }

            let attempt = FetchAttempt {
                number,
                failure,
                recovered,
            };
            tracing::info!(
                branch,
                attempt = attempt.number,
                failure = ?attempt.failure,
                recovered = attempt.recovered,
                error = %error,
                "retrying fetch"
            );

            if !self.policy.delay.is_zero() {
                thread::sleep(self.policy.delay);
            }
        }
    }
}
