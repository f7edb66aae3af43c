// Job Service Library
// Executes submitted code against named inputs in isolated per-job workspaces

pub mod config;
pub mod error;
pub mod execution;
pub mod job;
pub mod resolver;
pub mod runners;
pub mod tracker;
pub mod utils;
pub mod workspace;

// Re-export commonly used types
pub use config::{EngineConfig, InputStaging};
pub use error::{ServiceError, ServiceResult};

// Re-export job model types
pub use job::{validate_spec, JobId, JobSpec};

// Re-export execution types
pub use execution::{
    ExecutionEvent, JobHandle, JobOrchestrator, JobOutcome, ProgressSender, SubmitMode,
    Submission,
};

// Re-export collaborator and component types
pub use resolver::{LocalResolver, LocationResolver, MirrorResolver, ResolutionError};
pub use runners::{LanguageRunner, RunnerRegistry, RunnerStrategy};
pub use tracker::{JobSnapshot, JobState, LifecycleTracker};
pub use workspace::{StagingError, Workspace, WorkspaceError, WorkspaceManager};
