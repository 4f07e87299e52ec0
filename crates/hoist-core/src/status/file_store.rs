//! Status store persisted as one directory per deployment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{StatusStore, StoreError, validate_id};
use crate::config::Environment;
use crate::lock::{FileLock, OperationLockExt};
use crate::types::DeployResult;

const STATUS_FILE: &str = "status.json";

/// [`StatusStore`] writing `<deployments>/<id>/status.json` and the
/// `active` pointer file, serialized across processes by the status lock.
#[derive(Debug)]
pub struct FileStatusStore {
    deployments: PathBuf,
    active: PathBuf,
    lock: FileLock,
    timeout: Duration,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl FileStatusStore {
    pub fn new(environment: &Environment, timeout: Duration) -> Self {
        Self {
            deployments: environment.deployments_path(),
            active: environment.active_deployment_path(),
            lock: FileLock::new(environment.status_lock_path()),
            timeout,
        }
    }

    pub fn deployment_dir(&self, id: &str) -> PathBuf {
        self.deployments.join(id)
    }

    fn status_path(&self, id: &str) -> PathBuf {
        self.deployment_dir(id).join(STATUS_FILE)
    }

    fn locked<T>(
        &self,
        operation: &str,
        action: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.lock.lock_operation(operation, self.timeout, action)?
    }

    fn read(&self, id: &str) -> Result<Option<DeployResult>, StoreError> {
        let path = self.status_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path)(err)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: path.display().to_string(),
                source,
            })
    }

    fn write(&self, result: &DeployResult) -> Result<(), StoreError> {
        let dir = self.deployment_dir(&result.id);
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;

        let path = dir.join(STATUS_FILE);
        let tmp_path = dir.join(format!("{}.{}.tmp", STATUS_FILE, std::process::id()));
        let bytes = serde_json::to_vec_pretty(result).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        fs::write(&tmp_path, bytes).map_err(io_error(&tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(io_error(&path))?;
        Ok(())
    }

    fn read_active(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.active) {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&self.active)(err)),
        }
    }
}

impl StatusStore for FileStatusStore {
    fn get_all(&self) -> Result<Vec<DeployResult>, StoreError> {
        self.locked("status:get_all", || {
            let entries = match fs::read_dir(&self.deployments) {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(io_error(&self.deployments)(err)),
            };

            let mut results = Vec::new();
            for entry in entries {
                let entry = entry.map_err(io_error(&self.deployments))?;
                if !entry.path().is_dir() {
                    continue;
                }
                let id = entry.file_name().to_string_lossy().to_string();
                if validate_id(&id).is_err() {
                    continue;
                }
                match self.read(&id) {
                    Ok(Some(result)) => results.push(result),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(deployment_id = %id, error = %err, "skipping unreadable deployment status");
                    }
                }
            }

            let active = self.read_active()?;
            for result in &mut results {
                result.current = active.as_deref() == Some(result.id.as_str());
            }
            results.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            Ok(results)
        })
    }

    fn get(&self, id: &str) -> Result<Option<DeployResult>, StoreError> {
        validate_id(id)?;
        self.locked("status:get", || {
            let Some(mut result) = self.read(id)? else {
                return Ok(None);
            };
            result.current = self.read_active()?.as_deref() == Some(id);
            Ok(Some(result))
        })
    }

    fn create(&self, result: &DeployResult) -> Result<bool, StoreError> {
        validate_id(&result.id)?;
        self.locked("status:create", || {
            if self.status_path(&result.id).exists() {
                return Ok(false);
            }
            self.write(result)?;
            Ok(true)
        })
    }

    fn save(&self, result: &DeployResult) -> Result<(), StoreError> {
        validate_id(&result.id)?;
        self.locked("status:save", || self.write(result))
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        self.locked("status:delete", || {
            let dir = self.deployment_dir(id);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    tracing::debug!(deployment_id = %id, "deleted deployment");
                    Ok(())
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(io_error(&dir)(err)),
            }
        })
    }

    fn active_deployment_id(&self) -> Result<Option<String>, StoreError> {
        self.locked("status:active", || self.read_active())
    }

    fn set_active_deployment_id(&self, id: Option<&str>) -> Result<(), StoreError> {
        if let Some(id) = id {
            validate_id(id)?;
        }
        self.locked("status:set_active", || {
            fs::create_dir_all(&self.deployments).map_err(io_error(&self.deployments))?;
            fs::write(&self.active, id.unwrap_or_default()).map_err(io_error(&self.active))
        })
    }
}
