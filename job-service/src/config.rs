// Engine Configuration
// Tunables for workspace placement, timeouts, output capture and staging

use crate::error::{ServiceError, ServiceResult};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How resolved inputs are placed into a workspace's `inputs/` directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStaging {
    /// Copy every input (default)
    #[default]
    Copy,
    /// Hard-link files, falling back to a copy when linking fails
    HardLink,
}

/// Configuration for the execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root under which `<job_id>/` workspaces are created
    pub job_dir_root: PathBuf,
    /// Timeout applied to jobs whose spec does not set one (None = no timeout)
    #[serde(with = "crate::utils::opt_duration_secs")]
    pub default_timeout: Option<Duration>,
    /// Time between the graceful termination signal and a forced kill
    #[serde(with = "crate::utils::duration_secs")]
    pub kill_grace_period: Duration,
    /// Maximum bytes captured per output stream
    pub max_output_bytes: usize,
    /// Input staging strategy
    pub input_staging: InputStaging,
    /// Whether job processes inherit the engine's environment
    pub inherit_env: bool,
    /// Copy `outputs/` to the job's output location once it completes
    pub publish_outputs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_dir_root: PathBuf::from("./jobs"),
            default_timeout: None,
            kill_grace_period: Duration::from_secs(5),
            max_output_bytes: 1024 * 1024,
            input_staging: InputStaging::Copy,
            inherit_env: true,
            publish_outputs: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration rooted at the given job directory
    pub fn new(job_dir_root: impl Into<PathBuf>) -> Self {
        Self {
            job_dir_root: job_dir_root.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from YAML
    pub fn from_yaml_str(content: &str) -> ServiceResult<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&content)
    }

    /// Check internal consistency
    pub fn validate(&self) -> ServiceResult<()> {
        if self.max_output_bytes == 0 {
            return Err(ServiceError::Config(
                "max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if self.default_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ServiceError::Config(
                "default_timeout must be greater than zero".to_string(),
            ));
        }
        if self.job_dir_root.as_os_str().is_empty() {
            return Err(ServiceError::Config("job_dir_root must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn with_job_dir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.job_dir_root = root.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_kill_grace_period(mut self, grace: Duration) -> Self {
        self.kill_grace_period = grace;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_input_staging(mut self, staging: InputStaging) -> Self {
        self.input_staging = staging;
        self
    }

    pub fn with_inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    pub fn with_publish_outputs(mut self, publish: bool) -> Self {
        self.publish_outputs = publish;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.job_dir_root, PathBuf::from("./jobs"));
        assert_eq!(config.kill_grace_period, Duration::from_secs(5));
        assert!(config.default_timeout.is_none());
        assert!(config.inherit_env);
        assert_eq!(config.input_staging, InputStaging::Copy);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
job_dir_root: /var/lib/jobs
default_timeout: 300
kill_grace_period: 0.5
input_staging: hard_link
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.job_dir_root, PathBuf::from("/var/lib/jobs"));
        assert_eq!(config.default_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.kill_grace_period, Duration::from_millis(500));
        assert_eq!(config.input_staging, InputStaging::HardLink);
        // Unset fields keep their defaults
        assert_eq!(config.max_output_bytes, 1024 * 1024);
        assert!(config.publish_outputs);
    }

    #[test]
    fn test_from_yaml_rejects_zero_capture() {
        let err = EngineConfig::from_yaml_str("max_output_bytes: 0").unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_default_timeout() {
        let err = EngineConfig::from_yaml_str("default_timeout: 0").unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
        assert!(EngineConfig::default()
            .with_default_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_yaml_rejects_negative_duration() {
        assert!(EngineConfig::from_yaml_str("kill_grace_period: -1").is_err());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new("/tmp/jobs")
            .with_default_timeout(Duration::from_secs(10))
            .with_kill_grace_period(Duration::from_secs(1))
            .with_inherit_env(false);
        assert_eq!(config.job_dir_root, PathBuf::from("/tmp/jobs"));
        assert_eq!(config.default_timeout, Some(Duration::from_secs(10)));
        assert!(!config.inherit_env);
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "max_output_bytes: 4096\n").unwrap();
        let config = EngineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.max_output_bytes, 4096);

        assert!(EngineConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }
}
