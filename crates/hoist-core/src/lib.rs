//! Hoist Core Library
//!
//! Serializes site deployments behind a cross-process lock, fetches sources
//! through a retrying source-control wrapper and keeps a bounded history of
//! deployment results.

pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod lock;
pub mod retention;
pub mod source;
pub mod status;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{Environment, Settings};
    pub use crate::context::AppContext;

    // Deployment
    pub use crate::deploy::{
        BuildContext, BuildReporter, BuildStep, CommandBuildStep, DeploymentOrchestrator,
        LockStatus, SyncBuildStep,
    };
    pub use crate::error::{DeployError, ErrorKind};
    pub use crate::types::{
        ChangeSet, DeployResult, DeployStatus, DeploymentRequest, DeploymentResponse,
        DeploymentSource, RepositoryType, RequestMode,
    };

    // Locks
    pub use crate::lock::{
        AsyncLockQueue, DeploymentLock, FileLock, LockError, OperationLock, OperationLockExt,
    };

    // Fetch
    pub use crate::exec::{CommandError, Executable, ProcessExecutable};
    pub use crate::fetch::{FailureClassifier, FailureKind, FetchError, RetryPolicy, RetryableFetch};

    // History
    pub use crate::retention::RetentionPolicy;
    pub use crate::source::{RepositoryFactory, SourceRepository};
    pub use crate::status::{FileStatusStore, StatusStore};
}
