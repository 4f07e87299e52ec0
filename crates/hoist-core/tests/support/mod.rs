#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use hoist_core::config::{Environment, Settings};
use hoist_core::deploy::{BuildStep, DeploymentOrchestrator, SyncBuildStep};
use hoist_core::source::RepositoryFactory;
use hoist_core::status::{FileStatusStore, StatusStore};
use hoist_core::types::RepositoryType;

const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

pub fn git_available() -> bool {
    let mut cmd = Command::new("git");
    for key in GIT_ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd.arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Settings that never sleep between retries or polls for long.
pub fn fast_settings(repository_type: RepositoryType) -> Settings {
    let mut settings = Settings::default();
    settings.repository_type = repository_type;
    settings.retry.delay_ms = 0;
    settings.lock.poll_interval_ms = 10;
    settings.lock.status_timeout_secs = 10;
    settings.lock.repository_timeout_secs = 10;
    settings
}

pub struct Site {
    pub temp: TempDir,
    pub environment: Environment,
    pub store: Arc<dyn StatusStore>,
    pub orchestrator: DeploymentOrchestrator,
}

impl Site {
    pub fn new(settings: Settings) -> Self {
        Self::with_builder(settings, Arc::new(SyncBuildStep))
    }

    pub fn with_builder(settings: Settings, builder: Arc<dyn BuildStep>) -> Self {
        Self::build_with(settings, |_| builder)
    }

    /// Like [`Site::with_builder`], for steps that need the site layout.
    pub fn build_with(
        settings: Settings,
        make_builder: impl FnOnce(&Environment) -> Arc<dyn BuildStep>,
    ) -> Self {
        let temp = TempDir::new().unwrap();
        let environment = Environment::new(temp.path().join("site"));
        environment.ensure_dirs().unwrap();
        let builder = make_builder(&environment);

        let store: Arc<dyn StatusStore> =
            Arc::new(FileStatusStore::new(&environment, settings.status_timeout()));
        let repositories = Arc::new(RepositoryFactory::new(&environment, &settings));
        let orchestrator = DeploymentOrchestrator::new(
            environment.clone(),
            settings,
            store.clone(),
            repositories,
            builder,
        );

        Self {
            temp,
            environment,
            store,
            orchestrator,
        }
    }

    /// Write a zip archive with the given entries next to the site.
    pub fn zip(&self, name: &str, entries: &[(&str, &str)]) -> std::path::PathBuf {
        let path = self.temp.path().join(name);
        write_zip(&path, entries);
        path
    }
}

pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Non-bare repository whose HEAD points at `master`.
pub fn init_upstream(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("master");
    Repository::init_opts(path, &opts).unwrap()
}

pub fn commit_all(repo: &Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let sig = Signature::now("Site Dev", "dev@example.com").unwrap();
    match repo.head() {
        Ok(head) => {
            let parent = repo.find_commit(head.target().unwrap()).unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
                .unwrap()
        }
        Err(_) => repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
            .unwrap(),
    }
}
