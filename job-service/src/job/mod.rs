// Job Module
// Job spec model, YAML loading and submission-time validation

pub mod models;
pub mod validate;

pub use models::{JobId, JobSpec};
pub use validate::validate_spec;
