// Execution Events
// Progress reporting and event types for job execution

use crate::job::JobId;
use crate::runners::strategy::Phase;
use crate::tracker::JobState;

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Adapt a receiver into a `Stream` of events
pub fn event_stream(receiver: ProgressReceiver) -> UnboundedReceiverStream<ExecutionEvent> {
    UnboundedReceiverStream::new(receiver)
}

/// Events emitted while jobs execute
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Job registered, workspace created
    JobQueued {
        job_id: JobId,
        job_name: String,
        workspace: std::path::PathBuf,
    },

    /// First process of the job launched
    JobStarted { job_id: JobId, job_name: String },

    /// A setup, compile or main command started
    PhaseStarted {
        job_id: JobId,
        phase: Phase,
        command: String,
    },

    /// Job output (stdout/stderr)
    JobOutput {
        job_id: JobId,
        output: String,
        is_error: bool,
    },

    /// Job reached a terminal state
    JobCompleted {
        job_id: JobId,
        job_name: String,
        state: JobState,
        duration: Option<Duration>,
        exit_code: Option<i32>,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        job_id: Option<JobId>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a job queued event
    pub fn job_queued(
        job_id: JobId,
        job_name: impl Into<String>,
        workspace: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self::JobQueued {
            job_id,
            job_name: job_name.into(),
            workspace: workspace.into(),
        }
    }

    /// Create a job started event
    pub fn job_started(job_id: JobId, job_name: impl Into<String>) -> Self {
        Self::JobStarted {
            job_id,
            job_name: job_name.into(),
        }
    }

    /// Create a phase started event
    pub fn phase_started(job_id: JobId, phase: Phase, command: impl Into<String>) -> Self {
        Self::PhaseStarted {
            job_id,
            phase,
            command: command.into(),
        }
    }

    /// Create a job output event
    pub fn job_output(job_id: JobId, output: impl Into<String>, is_error: bool) -> Self {
        Self::JobOutput {
            job_id,
            output: output.into(),
            is_error,
        }
    }

    /// Create a job completed event
    pub fn job_completed(
        job_id: JobId,
        job_name: impl Into<String>,
        state: JobState,
        duration: Option<Duration>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::JobCompleted {
            job_id,
            job_name: job_name.into(),
            state,
            duration,
            exit_code,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, job_id: Option<JobId>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            job_id,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, job_id: Option<JobId>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            job_id,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, job_id: Option<JobId>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            job_id,
        }
    }

    /// Job this event belongs to, if any
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::JobQueued { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::PhaseStarted { job_id, .. }
            | Self::JobOutput { job_id, .. }
            | Self::JobCompleted { job_id, .. } => Some(*job_id),
            Self::Log { job_id, .. } => *job_id,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
