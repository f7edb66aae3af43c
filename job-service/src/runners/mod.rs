// Runners Module
// Maps a job's language to the commands that execute it

pub mod languages;
pub mod process;
pub mod strategy;

// Re-export key types
pub use languages::{Invocation, LanguageRunner};
pub use process::{
    CapturedOutput, CapturedStreams, ExitReason, OutputCallback, ProcessConfig, ProcessOutcome,
    ProcessRunner, RunningProcess,
};
pub use strategy::{CommandLine, Phase, RunnerStrategy, RESERVED_VARS};

use crate::error::{ServiceError, ServiceResult};
use crate::job::JobSpec;
use crate::workspace::Workspace;

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Registry of known languages
#[derive(Debug, Clone)]
pub struct RunnerRegistry {
    languages: Vec<LanguageRunner>,
}

impl RunnerRegistry {
    /// Create a registry with the builtin languages
    pub fn new() -> Self {
        Self {
            languages: languages::builtin_languages(),
        }
    }

    /// Create a registry with no languages registered
    pub fn empty() -> Self {
        Self {
            languages: Vec::new(),
        }
    }

    /// Register a language; it takes precedence over earlier registrations
    /// sharing a tag or alias
    pub fn register(&mut self, language: LanguageRunner) {
        self.languages.insert(0, language);
    }

    /// Builder form of `register`
    pub fn with_language(mut self, language: LanguageRunner) -> Self {
        self.register(language);
        self
    }

    /// Look up a language by tag or alias (case-insensitive)
    pub fn lookup(&self, tag: &str) -> Option<&LanguageRunner> {
        self.languages.iter().find(|l| l.matches(tag))
    }

    /// Canonical tags of every registered language
    pub fn tags(&self) -> Vec<&str> {
        self.languages.iter().map(|l| l.tag.as_str()).collect()
    }

    /// Check that a spec's language can be dispatched
    pub fn check(&self, spec: &JobSpec) -> ServiceResult<()> {
        if self.lookup(&spec.language).is_none() && spec.entrypoint.is_none() {
            return Err(ServiceError::UnsupportedLanguage(spec.language.clone()));
        }
        Ok(())
    }

    /// Compute the runner strategy for a staged job
    pub fn dispatch(
        &self,
        spec: &JobSpec,
        workspace: &Workspace,
        staged_inputs: &BTreeMap<String, PathBuf>,
    ) -> ServiceResult<RunnerStrategy> {
        let language = self.lookup(&spec.language);
        if language.is_none() {
            tracing::debug!(
                language = %spec.language,
                "Unknown language, running entrypoint directly"
            );
        }
        strategy::build_strategy(language, spec, workspace, staged_inputs)
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_builtin_aliases() {
        let registry = RunnerRegistry::new();
        assert_eq!(registry.lookup("PY").unwrap().tag, "python");
        assert_eq!(registry.lookup("javascript").unwrap().tag, "node");
        assert_eq!(registry.lookup("rs").unwrap().tag, "rust");
        assert!(registry.lookup("cobol").is_none());
    }

    #[test]
    fn test_register_overrides() {
        let mut registry = RunnerRegistry::new();
        registry.register(
            LanguageRunner::interpreted("python", "app.py", &["python3", "-u"])
                .with_aliases(&["py"]),
        );
        let python = registry.lookup("py").unwrap();
        assert_eq!(python.default_entrypoint, "app.py");
    }

    #[test]
    fn test_check_language() {
        let registry = RunnerRegistry::empty()
            .with_language(LanguageRunner::interpreted("bash", "run.sh", &["bash"]));
        assert!(registry.check(&JobSpec::new("a", "./c", "bash")).is_ok());
        assert!(matches!(
            registry.check(&JobSpec::new("a", "./c", "python")),
            Err(ServiceError::UnsupportedLanguage(_))
        ));
        assert!(registry
            .check(&JobSpec::new("a", "./c", "python").with_entrypoint("main"))
            .is_ok());
        assert_eq!(registry.tags(), vec!["bash"]);
    }
}
