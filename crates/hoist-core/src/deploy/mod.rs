//! Deployment orchestration: locking, fetching, building, recording.

pub mod builder;
pub mod marker;
pub mod orchestrator;

pub use builder::{
    BuildContext, BuildReporter, BuildStep, CommandBuildStep, SyncBuildStep, sync_tree,
};
pub use marker::PendingMarker;
pub use orchestrator::{DeploymentOrchestrator, LockStatus};
