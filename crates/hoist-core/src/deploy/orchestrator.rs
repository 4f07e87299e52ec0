//! Serialized deployments with bounded history.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::builder::{BuildContext, BuildReporter, BuildStep};
use super::marker::PendingMarker;
use crate::config::{Environment, Settings};
use crate::error::DeployError;
use crate::lock::{AsyncLockQueue, DeploymentLock, LockInfo, OperationLock, OperationLockExt};
use crate::retention::RetentionPolicy;
use crate::source::{RepositoryFactory, SourceError, extract_archive};
use crate::status::{DeploymentLogger, LogEntry, LogLevel, StatusStore, validate_id};
use crate::types::{
    ChangeSet, DeployResult, DeployStatus, DeploymentRequest, DeploymentResponse,
    DeploymentSource, RequestMode,
};

const DEPLOYMENT_OPERATION: &str = "deployment";

static NEXT_TEMPORARY_ID: AtomicU64 = AtomicU64::new(0);

fn temporary_id() -> String {
    format!(
        "tmp-{}-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S%f"),
        std::process::id(),
        NEXT_TEMPORARY_ID.fetch_add(1, Ordering::Relaxed)
    )
}

/// Snapshot of the deployment lock for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub held: bool,
    pub info: Option<LockInfo>,
    pub queued: usize,
}

/// Source tree ready to build.
struct Fetched {
    change_set: ChangeSet,
    source_dir: PathBuf,
}

struct Inner {
    environment: Environment,
    settings: Settings,
    lock: AsyncLockQueue<DeploymentLock>,
    store: Arc<dyn StatusStore>,
    repositories: Arc<RepositoryFactory>,
    builder: Arc<dyn BuildStep>,
    retention: RetentionPolicy,
    marker: PendingMarker,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Runs deployments one at a time and maintains their history.
///
/// Cloning is cheap; clones share the lock, the store and queued work.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    inner: Arc<Inner>,
}

impl DeploymentOrchestrator {
    pub fn new(
        environment: Environment,
        settings: Settings,
        store: Arc<dyn StatusStore>,
        repositories: Arc<RepositoryFactory>,
        builder: Arc<dyn BuildStep>,
    ) -> Self {
        let deployment_lock = DeploymentLock::new(environment.deployment_lock_path())
            .with_cleaner(repositories.clone());
        let lock = AsyncLockQueue::with_poll_interval(deployment_lock, settings.poll_interval());
        lock.initialize_async_locks();

        Self {
            inner: Arc::new(Inner {
                marker: PendingMarker::new(environment.pending_marker_path()),
                retention: settings.retention_policy(),
                environment,
                settings,
                lock,
                store,
                repositories,
                builder,
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Start a deployment.
    ///
    /// Synchronous requests run now or report [`DeploymentResponse::Conflict`];
    /// queued requests return [`DeploymentResponse::Accepted`] at once and run
    /// in order on a background task. Queued requests fail with
    /// [`LockError::Terminated`](crate::lock::LockError::Terminated) after
    /// [`shutdown`](Self::shutdown).
    ///
    /// A started deployment runs to completion on the blocking pool even if
    /// the returned future is dropped, and keeps the lock until it finishes.
    pub async fn request_deployment(
        &self,
        request: DeploymentRequest,
        mode: RequestMode,
    ) -> Result<DeploymentResponse, DeployError> {
        match mode {
            RequestMode::Synchronous => self.deploy_now(request).await,
            RequestMode::Queued => self.enqueue(request).await,
        }
    }

    /// Run `action` on the blocking pool; status store calls may wait on the
    /// status lock.
    async fn blocking<T, F>(&self, action: F) -> Result<T, DeployError>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> Result<T, DeployError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || action(&this))
            .await
            .map_err(|err| DeployError::build("deployment task failed", err.into()))?
    }

    async fn deploy_now(&self, request: DeploymentRequest) -> Result<DeploymentResponse, DeployError> {
        let Some(held) = self.inner.lock.try_acquire(DEPLOYMENT_OPERATION)? else {
            tracing::info!("deployment in progress, request rejected");
            if let Err(err) = self.inner.marker.touch() {
                tracing::warn!(error = %err, "failed to record pending request");
            }
            return Ok(DeploymentResponse::Conflict);
        };

        self.blocking(move |this| {
            let outcome = this.perform_deployment(request, None);
            held.release()?;
            outcome
        })
        .await
    }

    async fn enqueue(&self, request: DeploymentRequest) -> Result<DeploymentResponse, DeployError> {
        // Register first: arrival order is queue order, and a terminated
        // queue must fail before anything is recorded.
        let waiting = self
            .inner
            .lock
            .lock_async(DEPLOYMENT_OPERATION)
            .registered()?;
        let placeholder = {
            let request = request.clone();
            self.blocking(move |this| this.record_placeholder(&request))
                .await?
        };
        tracing::info!(deployment_id = %placeholder, queued = waiting.is_queued(), "deployment accepted");

        let this = self.clone();
        let id = placeholder.clone();
        let handle = tokio::spawn(async move {
            let held = match waiting.held().await {
                Ok(held) => held,
                Err(err) => {
                    tracing::error!(deployment_id = %id, error = %err, "queued deployment abandoned");
                    let text = err.to_string();
                    let failed = this
                        .blocking(move |this| {
                            this.fail_placeholder(&id, &text);
                            Ok(())
                        })
                        .await;
                    if let Err(err) = failed {
                        tracing::error!(error = %err, "failed to record abandoned deployment");
                    }
                    return;
                }
            };

            let outcome = this
                .blocking(move |this| {
                    let outcome = this.perform_deployment(request, Some(id));
                    held.release()?;
                    outcome
                })
                .await;

            match outcome {
                Ok(response) => tracing::debug!(?response, "queued deployment finished"),
                Err(err) => tracing::error!(error = %err, "queued deployment failed"),
            }
        });

        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        background.retain(|task| !task.is_finished());
        background.push(handle);

        Ok(DeploymentResponse::Accepted { id: placeholder })
    }

    /// Wait until every queued deployment accepted so far has finished.
    pub async fn wait_for_background(&self) {
        loop {
            let pending: Vec<_> = {
                let mut background = self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                background.drain(..).collect()
            };
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(err) = task.await {
                    tracing::error!(error = %err, "background deployment task failed");
                }
            }
        }
    }

    /// Stop accepting queued work and fail anything still waiting.
    pub fn shutdown(&self) {
        self.inner.lock.terminate_async_locks();
    }

    /// Run a deployment with the deployment lock already held.
    ///
    /// Repeats while reusable requests find the pending marker moved.
    fn perform_deployment(
        &self,
        request: DeploymentRequest,
        placeholder: Option<String>,
    ) -> Result<DeploymentResponse, DeployError> {
        let mut placeholder = placeholder;
        let mut last_completed = None;

        loop {
            let marker_before = self.inner.marker.last_modified();
            let temp_id = match placeholder.take() {
                Some(id) => id,
                None => self.record_placeholder(&request)?,
            };

            let response = self.deploy_once(&request, &temp_id)?;
            if let Err(err) = self.purge_history() {
                tracing::warn!(error = %err, "failed to purge deployment history");
            }

            let response = match (response, last_completed.take()) {
                (DeploymentResponse::NoChange, Some(previous)) => previous,
                (response, _) => response,
            };

            if request.is_reusable && self.inner.marker.last_modified() != marker_before {
                tracing::info!("more changes requested during deployment, deploying again");
                last_completed = Some(response);
                continue;
            }
            return Ok(response);
        }
    }

    fn deploy_once(
        &self,
        request: &DeploymentRequest,
        temp_id: &str,
    ) -> Result<DeploymentResponse, DeployError> {
        let store = &self.inner.store;

        let fetched = match self.fetch_source(request) {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                self.discard_placeholder(temp_id);
                return Ok(DeploymentResponse::NoChange);
            }
            Err(err) => {
                self.fail_placeholder(temp_id, &err.to_string());
                return Err(err);
            }
        };
        let id = fetched.change_set.id.clone();

        let active = store.active_deployment_id()?;
        if request.is_continuous && active.as_deref() == Some(id.as_str()) {
            tracing::info!(deployment_id = %id, "already deployed, skipping");
            self.discard_placeholder(temp_id);
            return Ok(DeploymentResponse::NoChange);
        }

        let mut result = match store.get(&id)? {
            Some(mut existing) => {
                existing.start_time = Utc::now();
                existing.end_time = None;
                existing.transition(DeployStatus::Pending, "Deployment queued.");
                existing
            }
            None => DeployResult::new(id.clone(), DeployStatus::Pending),
        };
        result.is_temporary = false;
        result.deployer = request.deployer.clone();
        result.author = request
            .author
            .clone()
            .unwrap_or_else(|| fetched.change_set.author.clone());
        result.message = request
            .message
            .clone()
            .unwrap_or_else(|| fetched.change_set.message.clone());
        store.save(&result)?;
        self.discard_placeholder(temp_id);

        let logger = DeploymentLogger::new(self.inner.environment.deployment_path(&id));
        logger.record(
            LogLevel::Info,
            &format!("Updating to '{}' ({}).", id, result.message),
        );
        result.transition(DeployStatus::Building, "Building and deploying.");
        store.save(&result)?;
        tracing::info!(deployment_id = %id, deployer = %result.deployer, "deployment started");

        let target_dir = self
            .inner
            .environment
            .target_path(self.inner.settings.build.target_dir.as_deref());
        let reporter = StoreReporter {
            store: store.as_ref(),
            logger: &logger,
            result: Mutex::new(result),
        };
        let build = self.inner.builder.build(&BuildContext {
            change_set: &fetched.change_set,
            source_dir: &fetched.source_dir,
            target_dir: &target_dir,
            reporter: &reporter,
        });
        let mut result = reporter.into_result();

        match build {
            Ok(()) => {
                result.transition(DeployStatus::Success, "Deployment successful.");
                store.save(&result)?;
                store.set_active_deployment_id(Some(&id))?;
                result.current = true;
                logger.record(LogLevel::Info, "Deployment successful.");
                tracing::info!(deployment_id = %id, "deployment succeeded");
            }
            Err(err) => {
                let text = format!("{err:#}");
                result.transition(DeployStatus::Failed, text.clone());
                store.save(&result)?;
                result.current = active.as_deref() == Some(id.as_str());
                logger.record(LogLevel::Error, &text);
                tracing::warn!(deployment_id = %id, error = %text, "deployment failed");
            }
        }

        Ok(DeploymentResponse::Completed(result))
    }

    /// `Ok(None)` when the requested branch does not exist.
    fn fetch_source(&self, request: &DeploymentRequest) -> Result<Option<Fetched>, DeployError> {
        let settings = &self.inner.settings;
        match &request.source {
            DeploymentSource::Repository {
                repo_url,
                branch,
                commit_id,
            } => {
                let repository = self.inner.repositories.ensure_repository()?;
                let remote = repo_url
                    .clone()
                    .or_else(|| settings.repository_url.clone())
                    .ok_or_else(|| DeployError::Config("no repository URL configured".into()))?;
                let branch = branch.as_deref().unwrap_or(&settings.branch);

                match repository.fetch(&remote, branch) {
                    Ok(()) => {}
                    Err(SourceError::Fetch(err)) if err.is_branch_not_found() => {
                        tracing::info!(branch, "branch not found, nothing to deploy");
                        return Ok(None);
                    }
                    Err(err) => return Err(err.into()),
                }
                if let Some(commit_id) = commit_id {
                    repository.update(commit_id)?;
                }

                let id = repository
                    .current_id()?
                    .ok_or_else(|| DeployError::Config(format!("branch '{branch}' has no commits")))?;
                Ok(Some(Fetched {
                    change_set: repository.change_set(&id)?,
                    source_dir: repository.path().to_path_buf(),
                }))
            }
            DeploymentSource::Zip { archive } => {
                let dest = self.inner.environment.zip_extract_path();
                let change_set = extract_archive(archive, &dest)
                    .map_err(|err| DeployError::build("failed to extract archive", err))?;
                Ok(Some(Fetched {
                    change_set,
                    source_dir: dest,
                }))
            }
            DeploymentSource::Existing { id } => {
                let repository = self.inner.repositories.ensure_repository()?;
                repository.update(id)?;
                Ok(Some(Fetched {
                    change_set: repository.change_set(id)?,
                    source_dir: repository.path().to_path_buf(),
                }))
            }
        }
    }

    fn record_placeholder(&self, request: &DeploymentRequest) -> Result<String, DeployError> {
        let id = temporary_id();
        let message = request.message.as_deref().unwrap_or_default();
        let placeholder = DeployResult::temporary(id.clone(), &request.deployer, message);
        self.inner.store.create(&placeholder)?;
        Ok(id)
    }

    fn discard_placeholder(&self, id: &str) {
        if let Err(err) = self.inner.store.delete(id) {
            tracing::warn!(deployment_id = %id, error = %err, "failed to remove temporary deployment");
        }
    }

    fn fail_placeholder(&self, id: &str, text: &str) {
        let updated = self.inner.store.get(id).and_then(|found| match found {
            Some(mut result) => {
                result.transition(DeployStatus::Failed, text);
                self.inner.store.save(&result)
            }
            None => Ok(()),
        });
        if let Err(err) = updated {
            tracing::warn!(deployment_id = %id, error = %err, "failed to record failed deployment");
        }
    }

    fn purge_history(&self) -> Result<Vec<DeployResult>, DeployError> {
        let history = self.inner.store.get_all()?;
        self.purge_deployments(history)
    }

    /// Delete what the retention policy selects from `history`.
    ///
    /// A failed delete is logged and skipped; the entry stays in the returned
    /// history and is considered again on the next purge.
    pub fn purge_deployments(
        &self,
        history: Vec<DeployResult>,
    ) -> Result<Vec<DeployResult>, DeployError> {
        let active = self.inner.store.active_deployment_id()?;
        let selected = self.inner.retention.purge(&history, active.as_deref());
        if selected.is_empty() {
            return Ok(history);
        }

        let mut deleted = BTreeSet::new();
        for id in selected {
            match self.inner.store.delete(&id) {
                Ok(()) => {
                    tracing::debug!(deployment_id = %id, "purged deployment");
                    deleted.insert(id);
                }
                Err(err) => {
                    tracing::warn!(deployment_id = %id, error = %err, "failed to purge deployment");
                }
            }
        }

        Ok(history
            .into_iter()
            .filter(|result| !deleted.contains(&result.id))
            .collect())
    }

    /// History after purging, most recent first.
    ///
    /// Blocks while another process holds the status lock.
    pub fn get_history(&self) -> Result<Vec<DeployResult>, DeployError> {
        self.purge_history()
    }

    pub fn get_result(&self, id: &str) -> Result<DeployResult, DeployError> {
        validate_id(id).map_err(|_| DeployError::NotFound { id: id.to_string() })?;
        self.inner
            .store
            .get(id)?
            .ok_or_else(|| DeployError::NotFound { id: id.to_string() })
    }

    pub fn get_log(&self, id: &str) -> Result<Vec<LogEntry>, DeployError> {
        self.get_result(id)?;
        DeploymentLogger::new(self.inner.environment.deployment_path(id))
            .entries()
            .map_err(|err| DeployError::build("failed to read deployment log", err))
    }

    /// Delete a finished deployment that is not active.
    pub fn delete(&self, id: &str) -> Result<(), DeployError> {
        validate_id(id).map_err(|_| DeployError::NotFound { id: id.to_string() })?;
        let store = &self.inner.store;
        if store.active_deployment_id()?.as_deref() == Some(id) {
            return Err(DeployError::Conflict(format!(
                "deployment '{id}' is active and cannot be deleted"
            )));
        }
        if store.get(id)?.is_none() {
            return Err(DeployError::NotFound { id: id.to_string() });
        }

        self.inner
            .lock
            .try_lock_operation("delete", Duration::ZERO, || store.delete(id))?
            .ok_or_else(|| DeployError::Conflict("a deployment is in progress".to_string()))??;
        tracing::info!(deployment_id = %id, "deleted deployment");
        Ok(())
    }

    /// Deploy a previously fetched change set again.
    pub async fn redeploy(
        &self,
        id: &str,
        deployer: &str,
        mode: RequestMode,
    ) -> Result<DeploymentResponse, DeployError> {
        let previous = {
            let id = id.to_string();
            self.blocking(move |this| this.get_result(&id)).await?
        };
        let request = DeploymentRequest::existing(id)
            .with_deployer(deployer)
            .with_author(previous.author)
            .with_message(previous.message);
        self.request_deployment(request, mode).await
    }

    pub fn lock_status(&self) -> LockStatus {
        let lock = self.inner.lock.inner();
        let held = lock.is_held();
        let info = if held {
            lock.lock_info().unwrap_or_else(|err| {
                tracing::debug!(error = %err, "unreadable lock info");
                None
            })
        } else {
            None
        };
        LockStatus {
            held,
            info,
            queued: self.inner.lock.queue_len(),
        }
    }
}

/// Mirrors build progress into the store and the deployment log.
struct StoreReporter<'a> {
    store: &'a dyn StatusStore,
    logger: &'a DeploymentLogger,
    result: Mutex<DeployResult>,
}

impl StoreReporter<'_> {
    fn into_result(self) -> DeployResult {
        self.result
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BuildReporter for StoreReporter<'_> {
    fn status(&self, status: DeployStatus, text: &str) {
        let mut result = self
            .result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        result.transition(status, text);
        if let Err(err) = self.store.save(&result) {
            tracing::warn!(deployment_id = %result.id, error = %err, "failed to save progress");
        }
        self.logger.record(LogLevel::Info, text);
    }

    fn log(&self, message: &str) {
        self.logger.record(LogLevel::Info, message);
    }
}
