// Location Resolver Module
// Maps symbolic or local references to concrete local paths

pub mod local;

pub use local::{LocalResolver, MirrorResolver};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving a location reference
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Malformed reference: {0}")]
    Malformed(String),

    #[error("Location not found: {0}")]
    NotFound(String),

    #[error("Unsupported scheme in reference: {0}")]
    UnsupportedScheme(String),

    #[error("IO error resolving {reference}: {source}")]
    Io {
        reference: String,
        #[source]
        source: std::io::Error,
    },
}

/// Trait for location resolvers.
///
/// Calls are synchronous and may block (e.g. while fetching remote content);
/// the orchestrator runs them on the blocking pool, several at a time for
/// one job.
pub trait LocationResolver: Send + Sync {
    /// Resolve a reference to a local file or directory that is readable
    /// when this call returns
    fn resolve(&self, reference: &str) -> Result<PathBuf, ResolutionError>;

    /// Resolve a reference used as an output destination.
    ///
    /// Defaults to `resolve`; implementations may create the destination.
    fn resolve_output(&self, reference: &str) -> Result<PathBuf, ResolutionError> {
        self.resolve(reference)
    }
}

/// Split `scheme://rest`, returning `None` for plain paths
pub fn split_scheme(reference: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = reference.split_once("://")?;
    let valid = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}
