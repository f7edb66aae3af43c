// Execution Engine Module
// Handles job submission, supervision of running jobs, and progress events

pub mod events;
pub mod handle;
pub mod orchestrator;
mod supervisor;

// Re-export key types
pub use events::{EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use handle::{JobHandle, JobOutcome, SubmitMode, Submission};
pub use orchestrator::JobOrchestrator;
