// Job Handles
// What `submit` hands back: a finished outcome or a handle to a running job

use crate::error::ServiceResult;
use crate::job::JobId;
use crate::tracker::{JobSnapshot, JobState, LifecycleTracker};

use std::path::PathBuf;
use std::sync::Arc;

/// Whether `submit` waits for the job to finish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubmitMode {
    /// Return once the job reaches a terminal state
    #[default]
    Sync,
    /// Return as soon as the job has been staged and launched
    Async,
}

/// Final result of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub snapshot: JobSnapshot,
    /// Absolute paths of the files left under `outputs/`
    pub outputs: Vec<PathBuf>,
}

impl JobOutcome {
    pub fn id(&self) -> JobId {
        self.snapshot.id
    }

    pub fn state(&self) -> JobState {
        self.snapshot.state
    }

    pub fn succeeded(&self) -> bool {
        self.snapshot.succeeded()
    }
}

impl From<JobSnapshot> for JobOutcome {
    fn from(snapshot: JobSnapshot) -> Self {
        let outputs_dir = snapshot.outputs_dir();
        let outputs = snapshot
            .outputs
            .iter()
            .map(|relative| outputs_dir.join(relative))
            .collect();
        Self { snapshot, outputs }
    }
}

/// Handle to a job submitted asynchronously
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    tracker: Arc<LifecycleTracker>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

impl JobHandle {
    pub(crate) fn new(id: JobId, tracker: Arc<LifecycleTracker>) -> Self {
        Self { id, tracker }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Current state of the job, without waiting
    pub async fn snapshot(&self) -> ServiceResult<JobSnapshot> {
        self.tracker.get(self.id).await
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(&self) -> ServiceResult<JobOutcome> {
        self.tracker.wait(self.id).await.map(JobOutcome::from)
    }

    /// Request cancellation; a no-op once the job has finished
    pub async fn cancel(&self) -> ServiceResult<()> {
        self.tracker.request_cancel(self.id).await
    }
}

/// Result of a successful submission
#[derive(Debug, Clone)]
pub enum Submission {
    Completed(JobOutcome),
    Handle(JobHandle),
}

impl Submission {
    pub fn id(&self) -> JobId {
        match self {
            Submission::Completed(outcome) => outcome.id(),
            Submission::Handle(handle) => handle.id(),
        }
    }

    /// The outcome, if the submission waited for it
    pub fn outcome(&self) -> Option<&JobOutcome> {
        match self {
            Submission::Completed(outcome) => Some(outcome),
            Submission::Handle(_) => None,
        }
    }

    /// Resolve to the final outcome, waiting if necessary
    pub async fn into_outcome(self) -> ServiceResult<JobOutcome> {
        match self {
            Submission::Completed(outcome) => Ok(outcome),
            Submission::Handle(handle) => handle.wait().await,
        }
    }
}
