// Workspace Module
// Per-job directory trees: creation, code/input staging and output handling

pub mod archive;
pub mod fsutil;
pub mod manager;

pub use archive::ArchiveKind;
pub use manager::{ManifestInput, Workspace, WorkspaceManager, WorkspaceManifest};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors creating or maintaining a workspace
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The job directory already exists; identifiers are generated, so this
    /// indicates a broken invariant rather than a user error
    #[error("Workspace already exists: {0}")]
    Collision(PathBuf),

    #[error("Workspace directory is not writable: {0}")]
    NotWritable(PathBuf),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write manifest: {0}")]
    Manifest(String),
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors copying code or inputs into a workspace
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Cannot read {path}: {source}")]
    UnreadableSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("Archive entry escapes the workspace: {0}")]
    UnsafeEntry(PathBuf),

    #[error("Failed to stage {source_path} into {dest}: {source}")]
    Copy {
        source_path: PathBuf,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
}
