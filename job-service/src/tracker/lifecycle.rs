// Lifecycle Tracker
// Owns every job record and applies state transitions under a single lock

use crate::error::{ServiceError, ServiceResult};
use crate::job::{JobId, JobSpec};
use crate::runners::process::CapturedStreams;
use crate::tracker::record::JobSnapshot;
use crate::tracker::state::JobState;
use crate::workspace::WorkspaceError;

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{watch, RwLock};

struct Slot {
    seq: u64,
    record: JobSnapshot,
    state_tx: watch::Sender<JobState>,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct Jobs {
    next_seq: u64,
    slots: HashMap<JobId, Slot>,
}

/// Registry of jobs and their lifecycle.
///
/// Records are never removed; terminal states never change.
#[derive(Default)]
pub struct LifecycleTracker {
    jobs: RwLock<Jobs>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new job in `Pending`
    pub async fn register(
        &self,
        id: JobId,
        spec: JobSpec,
        workspace: PathBuf,
    ) -> ServiceResult<JobSnapshot> {
        let mut jobs = self.jobs.write().await;
        if jobs.slots.contains_key(&id) {
            return Err(WorkspaceError::Collision(workspace).into());
        }

        let record = JobSnapshot::new(id, spec, workspace);
        let (state_tx, _) = watch::channel(JobState::Pending);
        let (cancel_tx, _) = watch::channel(false);
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.slots.insert(
            id,
            Slot {
                seq,
                record: record.clone(),
                state_tx,
                cancel_tx,
            },
        );

        tracing::debug!(job_id = %id, "Job registered");
        Ok(record)
    }

    /// Pending -> Running; a no-op when already running
    pub async fn record_start(&self, id: JobId) -> ServiceResult<bool> {
        self.transition(id, JobState::Running, |record| {
            record.started_at = Some(Utc::now());
        })
        .await
    }

    /// Record a natural exit: status 0 is `Completed`, anything else `Failed`
    pub async fn record_exit(
        &self,
        id: JobId,
        exit_code: Option<i32>,
        output: CapturedStreams,
    ) -> ServiceResult<bool> {
        let (state, message) = match exit_code {
            Some(0) => (JobState::Completed, None),
            Some(code) => (
                JobState::Failed,
                Some(format!("Process exited with status {}", code)),
            ),
            None => (
                JobState::Failed,
                Some("Process was terminated by a signal".to_string()),
            ),
        };
        self.finish(id, state, exit_code, Some(output), message).await
    }

    /// Record a failure that is not a plain process exit (staging, dispatch,
    /// launch, or a failing setup/compile step)
    pub async fn record_failure(
        &self,
        id: JobId,
        message: impl Into<String>,
        output: Option<CapturedStreams>,
    ) -> ServiceResult<bool> {
        self.finish(id, JobState::Failed, None, output, Some(message.into()))
            .await
    }

    pub async fn record_cancelled(
        &self,
        id: JobId,
        output: Option<CapturedStreams>,
    ) -> ServiceResult<bool> {
        self.finish(
            id,
            JobState::Cancelled,
            None,
            output,
            Some("Job was cancelled".to_string()),
        )
        .await
    }

    pub async fn record_timed_out(
        &self,
        id: JobId,
        output: CapturedStreams,
        timeout: std::time::Duration,
    ) -> ServiceResult<bool> {
        self.finish(
            id,
            JobState::TimedOut,
            None,
            Some(output),
            Some(format!("Job timed out after {:?}", timeout)),
        )
        .await
    }

    /// Store the listing of produced output files
    pub async fn record_outputs(&self, id: JobId, outputs: Vec<PathBuf>) -> ServiceResult<()> {
        let mut jobs = self.jobs.write().await;
        let slot = jobs.slots.get_mut(&id).ok_or(ServiceError::JobNotFound(id))?;
        if slot.record.is_terminal() {
            tracing::warn!(job_id = %id, "Ignoring output listing for finished job");
            return Ok(());
        }
        slot.record.outputs = outputs;
        Ok(())
    }

    /// Ask a job to stop.
    ///
    /// Idempotent: repeated requests and requests for finished jobs are
    /// no-ops. Only an unknown id is an error.
    pub async fn request_cancel(&self, id: JobId) -> ServiceResult<()> {
        let mut jobs = self.jobs.write().await;
        let slot = jobs.slots.get_mut(&id).ok_or(ServiceError::JobNotFound(id))?;
        if slot.record.is_terminal() || slot.record.cancel_requested {
            return Ok(());
        }
        slot.record.cancel_requested = true;
        slot.cancel_tx.send_replace(true);
        tracing::info!(job_id = %id, state = %slot.record.state, "Cancellation requested");
        Ok(())
    }

    /// Immutable copy of a job's current record
    pub async fn get(&self, id: JobId) -> ServiceResult<JobSnapshot> {
        let jobs = self.jobs.read().await;
        jobs.slots
            .get(&id)
            .map(|slot| slot.record.clone())
            .ok_or(ServiceError::JobNotFound(id))
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait(&self, id: JobId) -> ServiceResult<JobSnapshot> {
        let mut state_rx = {
            let jobs = self.jobs.read().await;
            let slot = jobs.slots.get(&id).ok_or(ServiceError::JobNotFound(id))?;
            slot.state_tx.subscribe()
        };
        let reached = state_rx
            .wait_for(|state| state.is_terminal())
            .await
            .map(|_| ());
        if reached.is_err() {
            return Err(ServiceError::JobNotFound(id));
        }
        self.get(id).await
    }

    /// Receiver that flips to `true` once cancellation is requested
    pub async fn cancel_signal(&self, id: JobId) -> ServiceResult<watch::Receiver<bool>> {
        let jobs = self.jobs.read().await;
        jobs.slots
            .get(&id)
            .map(|slot| slot.cancel_tx.subscribe())
            .ok_or(ServiceError::JobNotFound(id))
    }

    /// Receiver following the job's state
    pub async fn state_changes(&self, id: JobId) -> ServiceResult<watch::Receiver<JobState>> {
        let jobs = self.jobs.read().await;
        jobs.slots
            .get(&id)
            .map(|slot| slot.state_tx.subscribe())
            .ok_or(ServiceError::JobNotFound(id))
    }

    /// Snapshots of every job, in registration order
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut slots: Vec<&Slot> = jobs.slots.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots.into_iter().map(|slot| slot.record.clone()).collect()
    }

    async fn finish(
        &self,
        id: JobId,
        state: JobState,
        exit_code: Option<i32>,
        output: Option<CapturedStreams>,
        message: Option<String>,
    ) -> ServiceResult<bool> {
        self.transition(id, state, move |record| {
            record.exit_code = exit_code;
            if let Some(output) = output {
                record.stdout = output.stdout.text;
                record.stderr = output.stderr.text;
                record.stdout_truncated = output.stdout.truncated;
                record.stderr_truncated = output.stderr.truncated;
            }
            record.message = message;
            record.finished_at = Some(Utc::now());
        })
        .await
    }

    /// Apply `next` if the lifecycle allows it. Returns whether the state
    /// changed; disallowed transitions leave the record untouched.
    async fn transition(
        &self,
        id: JobId,
        next: JobState,
        apply: impl FnOnce(&mut JobSnapshot),
    ) -> ServiceResult<bool> {
        let mut jobs = self.jobs.write().await;
        let slot = jobs.slots.get_mut(&id).ok_or(ServiceError::JobNotFound(id))?;
        let current = slot.record.state;

        if current == next {
            return Ok(false);
        }
        if !current.can_transition_to(next) {
            tracing::warn!(job_id = %id, from = %current, to = %next, "Ignoring invalid transition");
            return Ok(false);
        }

        apply(&mut slot.record);
        slot.record.state = next;
        slot.state_tx.send_replace(next);

        if next.is_terminal() {
            tracing::info!(
                job_id = %id,
                state = %next,
                exit_code = ?slot.record.exit_code,
                "Job finished"
            );
        } else {
            tracing::debug!(job_id = %id, state = %next, "Job state changed");
        }
        Ok(true)
    }
}
