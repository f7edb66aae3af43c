// Job Supervisor
// Drives one staged job through its commands and records how it ended

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::job::JobId;
use crate::runners::process::{
    cancellation, CapturedStreams, ExitReason, OutputCallback, ProcessOutcome, ProcessRunner,
};
use crate::runners::strategy::{CommandLine, Phase, RunnerStrategy};
use crate::tracker::LifecycleTracker;
use crate::workspace::{Workspace, WorkspaceManager};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

/// How the job's commands ended, before outputs are collected
enum Verdict {
    Exited {
        code: Option<i32>,
        output: CapturedStreams,
    },
    Failed {
        message: String,
        output: Option<CapturedStreams>,
    },
    Cancelled {
        output: Option<CapturedStreams>,
    },
    TimedOut {
        output: CapturedStreams,
    },
}

/// Per-job state carried across its commands
struct PhaseRun {
    deadline: Option<Instant>,
    on_output: Option<OutputCallback>,
    captured: CapturedStreams,
    launched: bool,
}

/// Owns a job from launch to terminal state
pub(crate) struct Supervisor {
    pub id: JobId,
    pub name: String,
    pub strategy: RunnerStrategy,
    pub workspace: Workspace,
    pub workspaces: WorkspaceManager,
    pub tracker: Arc<LifecycleTracker>,
    pub process: ProcessRunner,
    pub timeout: Option<Duration>,
    /// Resolved location `outputs/` is copied to on success
    pub publish_to: Option<PathBuf>,
    /// Shared concurrency limit (batch submissions)
    pub limiter: Option<Arc<Semaphore>>,
    pub events: Option<ProgressSender>,
}

impl Supervisor {
    pub async fn run(self) {
        let mut cancel = match self.tracker.cancel_signal(self.id).await {
            Ok(cancel) => cancel,
            Err(e) => {
                tracing::warn!(job_id = %self.id, error = %e, "Job vanished before launch");
                return;
            }
        };

        // Held until the terminal state is recorded
        let _permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                permit = limiter.clone().acquire_owned() => permit.ok(),
                _ = cancellation(&mut cancel) => {
                    self.conclude(Verdict::Cancelled { output: None }).await;
                    return;
                }
            },
            None => None,
        };

        let verdict = self.execute(&mut cancel).await;
        self.conclude(verdict).await;
    }

    async fn execute(&self, cancel: &mut watch::Receiver<bool>) -> Verdict {
        if *cancel.borrow() {
            return Verdict::Cancelled { output: None };
        }

        let mut run = PhaseRun {
            // A timeout past the clock's range never fires
            deadline: self
                .timeout
                .and_then(|timeout| Instant::now().checked_add(timeout)),
            on_output: self.output_callback(),
            captured: CapturedStreams::default(),
            launched: false,
        };

        for (phase, command) in &self.strategy.preludes {
            let outcome = match self.run_phase(*phase, command, &mut run, cancel).await {
                Ok(outcome) => outcome,
                Err(verdict) => return verdict,
            };
            if !outcome.succeeded() {
                let status = outcome
                    .exit_code
                    .map(|code| format!("status {}", code))
                    .unwrap_or_else(|| "a signal".to_string());
                return Verdict::Failed {
                    message: format!("{} step failed with {}", phase, status),
                    output: Some(run.captured),
                };
            }
        }

        match self
            .run_phase(Phase::Main, &self.strategy.main, &mut run, cancel)
            .await
        {
            Ok(outcome) => Verdict::Exited {
                code: outcome.exit_code,
                output: run.captured,
            },
            Err(verdict) => verdict,
        }
    }

    /// Launch one command and wait for it. Returns the outcome when the
    /// process exited on its own, or the verdict that ends the job.
    async fn run_phase(
        &self,
        phase: Phase,
        command: &CommandLine,
        run: &mut PhaseRun,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<ProcessOutcome, Verdict> {
        self.events.send_event(ExecutionEvent::phase_started(
            self.id,
            phase,
            command.to_string(),
        ));
        tracing::debug!(job_id = %self.id, %phase, command = %command, "Launching");

        let process = self
            .process
            .spawn(
                command,
                &self.strategy.env,
                &self.strategy.working_dir,
                run.on_output.clone(),
            )
            .map_err(|e| Verdict::Failed {
                message: e.to_string(),
                output: run.launched.then(|| std::mem::take(&mut run.captured)),
            })?;

        if !run.launched {
            run.launched = true;
            if matches!(self.tracker.record_start(self.id).await, Ok(true)) {
                self.events
                    .send_event(ExecutionEvent::job_started(self.id, self.name.clone()));
            }
        }

        let outcome = process.wait(run.deadline, cancel).await;
        run.captured
            .extend(&outcome, self.process.config().max_output_bytes);

        match outcome.reason {
            ExitReason::Exited => Ok(outcome),
            ExitReason::TimedOut => Err(Verdict::TimedOut {
                output: std::mem::take(&mut run.captured),
            }),
            ExitReason::Cancelled => Err(Verdict::Cancelled {
                output: Some(std::mem::take(&mut run.captured)),
            }),
        }
    }

    /// Collect outputs, then record the terminal state
    async fn conclude(&self, verdict: Verdict) {
        let publish_to = match &verdict {
            Verdict::Exited { code: Some(0), .. } => self.publish_to.clone(),
            _ => None,
        };

        let workspaces = self.workspaces.clone();
        let workspace = self.workspace.clone();
        let collected = tokio::task::spawn_blocking(move || {
            workspaces.finalize(&workspace)?;
            let listing = workspaces.list_outputs(&workspace)?;
            if let Some(destination) = publish_to {
                workspaces.publish_outputs(&workspace, &destination)?;
            }
            Ok::<_, crate::workspace::WorkspaceError>(listing)
        })
        .await;

        let verdict = match collected {
            Ok(Ok(listing)) => {
                if let Err(e) = self.tracker.record_outputs(self.id, listing).await {
                    tracing::warn!(job_id = %self.id, error = %e, "Failed to record outputs");
                }
                verdict
            }
            Ok(Err(e)) => self.downgrade(verdict, format!("Output handling failed: {}", e)),
            Err(e) => self.downgrade(verdict, format!("Output handling panicked: {}", e)),
        };

        let recorded = match verdict {
            Verdict::Exited { code, output } => {
                self.tracker.record_exit(self.id, code, output).await
            }
            Verdict::Failed { message, output } => {
                self.tracker.record_failure(self.id, message, output).await
            }
            Verdict::Cancelled { output } => self.tracker.record_cancelled(self.id, output).await,
            Verdict::TimedOut { output } => {
                let timeout = self.timeout.unwrap_or_default();
                self.tracker
                    .record_timed_out(self.id, output, timeout)
                    .await
            }
        };
        if let Err(e) = recorded {
            tracing::warn!(job_id = %self.id, error = %e, "Failed to record job result");
        }

        if let Ok(snapshot) = self.tracker.get(self.id).await {
            self.events.send_event(ExecutionEvent::job_completed(
                self.id,
                snapshot.name.clone(),
                snapshot.state,
                snapshot.duration(),
                snapshot.exit_code,
            ));
        }
    }

    /// A successful run whose outputs could not be handled becomes a failure;
    /// other verdicts keep their state
    fn downgrade(&self, verdict: Verdict, message: String) -> Verdict {
        tracing::warn!(job_id = %self.id, "{}", message);
        match verdict {
            Verdict::Exited {
                code: Some(0),
                output,
            } => Verdict::Failed {
                message,
                output: Some(output),
            },
            other => other,
        }
    }

    fn output_callback(&self) -> Option<OutputCallback> {
        let events = self.events.clone()?;
        let id = self.id;
        Some(Arc::new(move |line: &str, is_error: bool| {
            events.send_event(ExecutionEvent::job_output(id, line, is_error));
        }))
    }
}
