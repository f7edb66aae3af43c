// Tracker Module
// Job lifecycle state machine and the registry of job records

pub mod lifecycle;
pub mod record;
pub mod state;

pub use lifecycle::LifecycleTracker;
pub use record::JobSnapshot;
pub use state::JobState;
