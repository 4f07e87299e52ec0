//! Application context wiring every service for one site.

use std::path::Path;
use std::sync::Arc;

use crate::config::{Environment, Settings, load_settings};
use crate::deploy::{BuildStep, CommandBuildStep, DeploymentOrchestrator, SyncBuildStep};
use crate::source::RepositoryFactory;
use crate::status::{FileStatusStore, StatusStore};

/// Services for one site, built from its [`Environment`] and [`Settings`].
///
/// Frontends create this once and pass it to commands.
#[derive(Clone)]
pub struct AppContext {
    environment: Environment,
    settings: Settings,
    store: Arc<dyn StatusStore>,
    repositories: Arc<RepositoryFactory>,
    orchestrator: DeploymentOrchestrator,
}

impl AppContext {
    /// Build a context with explicit settings.
    pub fn new(environment: Environment, settings: Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        environment.ensure_dirs()?;

        let store: Arc<dyn StatusStore> =
            Arc::new(FileStatusStore::new(&environment, settings.status_timeout()));
        let repositories = Arc::new(RepositoryFactory::new(&environment, &settings));
        let builder: Arc<dyn BuildStep> = match &settings.build.command {
            Some(command) => Arc::new(CommandBuildStep::new(command.clone())),
            None => Arc::new(SyncBuildStep),
        };

        let orchestrator = DeploymentOrchestrator::new(
            environment.clone(),
            settings.clone(),
            store.clone(),
            repositories.clone(),
            builder,
        );

        tracing::debug!(root = %environment.root().display(), repository = %settings.repository_type, "context ready");
        Ok(Self {
            environment,
            settings,
            store,
            repositories,
            orchestrator,
        })
    }

    /// Build a context for the site at `root`, reading its hoist.toml.
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let environment = Environment::new(root);
        let settings = load_settings(&environment)?;
        Self::new(environment, settings)
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    pub fn repositories(&self) -> &Arc<RepositoryFactory> {
        &self.repositories
    }

    pub fn orchestrator(&self) -> &DeploymentOrchestrator {
        &self.orchestrator
    }
}
