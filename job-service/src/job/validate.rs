// Spec Validation
// Rejects malformed job specs before any resource is allocated

use crate::error::{ServiceError, ServiceResult};
use crate::job::models::JobSpec;
use crate::runners::strategy::RESERVED_VARS;
use crate::utils::{is_contained_relative, is_env_identifier};

use std::path::Path;

/// Validate a job spec.
///
/// Checks identifier-safe input names, reserved-name collisions in inputs
/// and extra environment, and that relative paths stay inside the workspace.
/// Language support is checked separately against the runner registry.
pub fn validate_spec(spec: &JobSpec) -> ServiceResult<()> {
    if spec.name.trim().is_empty() {
        return Err(ServiceError::invalid_spec("job name must not be empty"));
    }
    if spec.code.trim().is_empty() {
        return Err(ServiceError::invalid_spec("code reference must not be empty"));
    }
    if spec.language.trim().is_empty() {
        return Err(ServiceError::invalid_spec("language tag must not be empty"));
    }

    for (name, reference) in &spec.inputs {
        if !is_env_identifier(name) {
            return Err(ServiceError::invalid_spec(format!(
                "input name '{}' is not a valid environment variable name",
                name
            )));
        }
        if is_reserved(name) {
            return Err(ServiceError::invalid_spec(format!(
                "input name '{}' collides with a reserved variable",
                name
            )));
        }
        if reference.trim().is_empty() {
            return Err(ServiceError::invalid_spec(format!(
                "input '{}' has an empty reference",
                name
            )));
        }
    }

    for name in spec.env.keys() {
        if !is_env_identifier(name) {
            return Err(ServiceError::invalid_spec(format!(
                "environment name '{}' is not a valid identifier",
                name
            )));
        }
        if is_reserved(name) {
            return Err(ServiceError::invalid_spec(format!(
                "environment name '{}' collides with a reserved variable",
                name
            )));
        }
    }

    check_relative("entrypoint", spec.entrypoint.as_deref())?;
    check_relative("setup", spec.setup.as_deref())?;
    check_relative("working_dir", spec.working_dir.as_deref())?;

    if spec.timeout.is_some_and(|t| t.is_zero()) {
        return Err(ServiceError::invalid_spec("timeout must be greater than zero"));
    }

    Ok(())
}

fn is_reserved(name: &str) -> bool {
    RESERVED_VARS.contains(&name)
}

fn check_relative(field: &str, value: Option<&str>) -> ServiceResult<()> {
    match value {
        Some(path) if !is_contained_relative(Path::new(path)) => Err(ServiceError::invalid_spec(
            format!("{} '{}' must be a relative path inside the workspace", field, path),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec() -> JobSpec {
        JobSpec::new("job", "./code", "python")
    }

    #[test]
    fn test_valid_spec() {
        let spec = spec()
            .with_input("TRAIN", "./train.csv")
            .with_env("SEED", "42")
            .with_entrypoint("src/main.py");
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn test_rejects_bad_input_name() {
        let err = validate_spec(&spec().with_input("my-data", "./x")).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidSpec(_)));
    }

    #[test]
    fn test_rejects_reserved_input_name() {
        let err = validate_spec(&spec().with_input("OUTPUT_DIR", "./x")).unwrap_err();
        assert!(err.to_string().contains("OUTPUT_DIR"));
        assert!(validate_spec(&spec().with_input("CODE_DIR", "./x")).is_err());
    }

    #[test]
    fn test_rejects_reserved_env_name() {
        assert!(validate_spec(&spec().with_env("OUTPUT_DIR", "/tmp")).is_err());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        assert!(validate_spec(&spec().with_entrypoint("../main.py")).is_err());
        assert!(validate_spec(&spec().with_setup("/bin/setup.sh")).is_err());
        assert!(validate_spec(&spec().with_working_dir("code/../../")).is_err());
    }

    #[test]
    fn test_rejects_empty_fields() {
        assert!(validate_spec(&JobSpec::new("", "./code", "python")).is_err());
        assert!(validate_spec(&JobSpec::new("job", " ", "python")).is_err());
        assert!(validate_spec(&JobSpec::new("job", "./code", "")).is_err());
        assert!(validate_spec(&spec().with_input("DATA", "")).is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(validate_spec(&spec().with_timeout(Duration::ZERO)).is_err());
    }
}
