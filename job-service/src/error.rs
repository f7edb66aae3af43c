// Service Errors
// Error taxonomy shared by the job execution engine

use crate::job::JobId;
use crate::resolver::ResolutionError;
use crate::workspace::{StagingError, WorkspaceError};

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Errors raised before a job exists are returned from `submit`. Once a job
/// has been registered, failures are recorded on the job itself (terminal
/// state plus message) and only observable through the tracker.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid job spec: {0}")]
    InvalidSpec(String),

    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("Unsupported language '{0}' (no entrypoint given)")]
    UnsupportedLanguage(String),

    #[error("Entrypoint not found: {0}")]
    EntrypointMissing(PathBuf),

    #[error("Failed to launch '{program}': {reason}")]
    ProcessLaunch { program: String, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    /// Shorthand for an invalid spec error
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec(message.into())
    }
}

/// Result alias used throughout the crate
pub type ServiceResult<T> = Result<T, ServiceError>;
