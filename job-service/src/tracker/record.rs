// Job Records
// Point-in-time view of a job as seen by the lifecycle tracker

use crate::job::{JobId, JobSpec};
use crate::tracker::state::JobState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable copy of a job's record.
///
/// Snapshots are taken under the tracker lock, so a snapshot never shows a
/// half-applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub spec: JobSpec,
    pub state: JobState,
    /// Workspace root (`<job_dir_root>/<id>`)
    pub workspace: PathBuf,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    /// Error text or reason for a non-successful terminal state
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_requested: bool,
    /// Files under `outputs/`, relative to it
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
}

impl JobSnapshot {
    pub(crate) fn new(id: JobId, spec: JobSpec, workspace: PathBuf) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            spec,
            state: JobState::Pending,
            workspace,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            message: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cancel_requested: false,
            outputs: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the job reached `Completed`
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed
    }

    /// Time from first process launch to terminal state
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        (finished - started).to_std().ok()
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.workspace.join(crate::workspace::manager::OUTPUTS_DIR)
    }
}
