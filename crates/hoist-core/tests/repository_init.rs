use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use hoist_core::lock::{DeploymentLock, LockCleaner, OperationLock};
use hoist_core::source::{RepositoryFactory, SourceError, SourceRepository};
use hoist_core::types::{ChangeSet, RepositoryType};

/// Repository whose creation is slow and counted.
struct SlowRepository {
    path: PathBuf,
    created: AtomicBool,
    initializations: AtomicUsize,
    lock_clears: AtomicUsize,
}

impl SlowRepository {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            created: AtomicBool::new(false),
            initializations: AtomicUsize::new(0),
            lock_clears: AtomicUsize::new(0),
        }
    }
}

impl SourceRepository for SlowRepository {
    fn repository_type(&self) -> RepositoryType {
        RepositoryType::Git
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    fn initialize(&self) -> Result<(), SourceError> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn fetch(&self, _remote: &str, _branch: &str) -> Result<(), SourceError> {
        Ok(())
    }

    fn update(&self, _id: &str) -> Result<(), SourceError> {
        Ok(())
    }

    fn current_id(&self) -> Result<Option<String>, SourceError> {
        Ok(None)
    }

    fn change_set(&self, id: &str) -> Result<ChangeSet, SourceError> {
        Ok(ChangeSet::new(id, "", ""))
    }

    fn clear_lock(&self) -> anyhow::Result<()> {
        self.lock_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn concurrent_callers_initialize_once() {
    let temp = TempDir::new().unwrap();
    let repository = Arc::new(SlowRepository::new(temp.path().join("repository")));
    let factory = Arc::new(RepositoryFactory::with_repository(
        repository.clone(),
        temp.path().join("locks").join("repository.lock"),
        Duration::from_secs(10),
    ));
    let barrier = Arc::new(Barrier::new(5));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let factory = factory.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                factory.ensure_repository().unwrap()
            })
        })
        .collect();
    let shared: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(repository.initializations.load(Ordering::SeqCst), 1);
    for handle in &shared[1..] {
        assert!(Arc::ptr_eq(&shared[0], handle));
    }
    assert_eq!(factory.repository_type(), RepositoryType::Git);
}

#[test]
fn unconfigured_factory_has_no_repository() {
    let temp = TempDir::new().unwrap();
    let environment = hoist_core::config::Environment::new(temp.path());
    let mut settings = hoist_core::config::Settings::default();
    settings.repository_type = RepositoryType::None;

    let factory = RepositoryFactory::new(&environment, &settings);
    assert_eq!(factory.repository_type(), RepositoryType::None);
    assert!(factory.repository().is_none());
    assert!(matches!(factory.ensure_repository(), Err(SourceError::NotConfigured)));
    factory.clear_lock().unwrap();
}

#[test]
fn deployment_lock_clears_stale_repository_locks() {
    let temp = TempDir::new().unwrap();
    let repository = Arc::new(SlowRepository::new(temp.path().join("repository")));
    let factory = Arc::new(RepositoryFactory::with_repository(
        repository.clone(),
        temp.path().join("repository.lock"),
        Duration::from_secs(10),
    ));

    let lock = DeploymentLock::new(temp.path().join("deployment.lock")).with_cleaner(factory.clone());

    // Nothing to clean before the repository exists.
    assert!(lock.try_lock("deploy").unwrap());
    lock.release().unwrap();
    assert_eq!(repository.lock_clears.load(Ordering::SeqCst), 0);

    factory.ensure_repository().unwrap();
    assert!(lock.try_lock("deploy").unwrap());
    lock.release().unwrap();
    assert_eq!(repository.lock_clears.load(Ordering::SeqCst), 1);
}
