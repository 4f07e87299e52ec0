//! Deployment history retention.
//!
//! [`RetentionPolicy::purge`] picks which results to delete so the history
//! stays bounded: it drops superseded failures and placeholders first, then
//! the oldest finished results beyond the configured maximum. It never picks
//! the active deployment and never counts in-progress entries against the limit.

use std::collections::BTreeSet;

use crate::types::{DeployResult, DeployStatus};

/// Number of finished results kept by default.
pub const MAX_SUCCESS_DEPLOYMENT_RESULTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_success_results: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_success_results: MAX_SUCCESS_DEPLOYMENT_RESULTS,
        }
    }
}

impl RetentionPolicy {
    pub fn new(max_success_results: usize) -> Self {
        Self { max_success_results }
    }

    /// Ids from `history` (most recent first) that should be deleted.
    pub fn purge(&self, history: &[DeployResult], active_id: Option<&str>) -> BTreeSet<String> {
        let is_active = |id: &str| active_id == Some(id);
        let mut selected = BTreeSet::new();

        // Failures that never succeeded: only the latest is interesting.
        let never_succeeded: Vec<_> = history
            .iter()
            .filter(|r| r.status == DeployStatus::Failed && r.last_success_end_time.is_none())
            .collect();
        if never_succeeded.len() > 1 {
            selected.extend(
                never_succeeded
                    .iter()
                    .skip(1)
                    .filter(|r| !is_active(r.id.as_str()))
                    .map(|r| r.id.clone()),
            );
        }

        // Placeholders superseded by other in-progress entries.
        let in_progress: Vec<_> = history
            .iter()
            .filter(|r| r.status.is_in_progress())
            .collect();
        if in_progress.len() > 1 {
            let has_real = in_progress.iter().any(|r| !r.is_temporary);
            let temporary = in_progress.iter().filter(|r| r.is_temporary);
            let superseded: Vec<_> = if has_real {
                temporary.collect()
            } else {
                temporary.skip(1).collect()
            };
            selected.extend(
                superseded
                    .into_iter()
                    .filter(|r| !is_active(r.id.as_str()))
                    .map(|r| r.id.clone()),
            );
        }

        // Finished results that have succeeded at least once, beyond the limit.
        selected.extend(
            history
                .iter()
                .filter(|r| !r.status.is_in_progress() && r.last_success_end_time.is_some())
                .skip(self.max_success_results)
                .filter(|r| !is_active(r.id.as_str()))
                .map(|r| r.id.clone()),
        );

        selected
    }
}
