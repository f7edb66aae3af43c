// Runner Strategy
// The concrete commands, working directory and environment for one job

use crate::error::{ServiceError, ServiceResult};
use crate::job::JobSpec;
use crate::runners::languages::{Invocation, LanguageRunner, TemplateContext};
use crate::workspace::Workspace;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable pointing at the workspace's `outputs/` directory
pub const OUTPUT_DIR_VAR: &str = "OUTPUT_DIR";
/// Environment variable pointing at the workspace's `code/` directory
pub const CODE_DIR_VAR: &str = "CODE_DIR";
/// Environment variable carrying the job id
pub const JOB_ID_VAR: &str = "JOB_ID";

/// Names the engine always sets; specs may not use them
pub const RESERVED_VARS: &[&str] = &[OUTPUT_DIR_VAR, CODE_DIR_VAR, JOB_ID_VAR];

/// Stage of a job's execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Compile,
    Main,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::Compile => write!(f, "compile"),
            Phase::Main => write!(f, "main"),
        }
    }
}

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Build from an argv vector; None when it is empty
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut parts = argv.into_iter();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Everything needed to execute a job, computed once after staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerStrategy {
    /// Commands run in order before the main command (setup, compile)
    pub preludes: Vec<(Phase, CommandLine)>,
    pub main: CommandLine,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl RunnerStrategy {
    /// All commands in execution order
    pub fn phases(&self) -> impl Iterator<Item = (Phase, &CommandLine)> {
        self.preludes
            .iter()
            .map(|(phase, cmd)| (*phase, cmd))
            .chain(std::iter::once((Phase::Main, &self.main)))
    }
}

/// Compute the strategy for a staged job.
///
/// `language` is None for tags the registry does not know; such jobs need an
/// explicit entrypoint, which is then run directly.
pub fn build_strategy(
    language: Option<&LanguageRunner>,
    spec: &JobSpec,
    workspace: &Workspace,
    staged_inputs: &BTreeMap<String, PathBuf>,
) -> ServiceResult<RunnerStrategy> {
    let code_dir = workspace.code_dir();

    let relative = match (&spec.entrypoint, language) {
        (Some(entrypoint), _) => entrypoint.clone(),
        (None, Some(language)) => language.default_entrypoint.clone(),
        (None, None) => return Err(ServiceError::UnsupportedLanguage(spec.language.clone())),
    };
    let entrypoint = code_dir.join(&relative);
    if !entrypoint.is_file() {
        return Err(ServiceError::EntrypointMissing(entrypoint));
    }

    let stem = entrypoint
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string());
    let artifact = code_dir.join(format!("{}.out", stem));
    let templates = TemplateContext {
        entrypoint: &entrypoint,
        artifact: &artifact,
        code_dir: &code_dir,
    };

    let mut preludes = Vec::new();

    if let Some(setup) = &spec.setup {
        let script = code_dir.join(setup);
        if !script.is_file() {
            return Err(ServiceError::invalid_spec(format!(
                "setup script not found: {}",
                script.display()
            )));
        }
        preludes.push((
            Phase::Setup,
            CommandLine::new("bash").arg(script.to_string_lossy()),
        ));
    }

    let main = match language.map(|l| &l.invocation) {
        Some(Invocation::Interpreted { run }) => {
            command(templates.render(run), &spec.language)?
        }
        Some(Invocation::Compiled { compile, run }) => {
            preludes.push((
                Phase::Compile,
                command(templates.render(compile), &spec.language)?,
            ));
            command(templates.render(run), &spec.language)?
        }
        Some(Invocation::Executable) | None => {
            mark_executable(&entrypoint)?;
            CommandLine::new(entrypoint.to_string_lossy())
        }
    };

    let working_dir = match &spec.working_dir {
        Some(dir) => {
            let dir = workspace.root().join(dir);
            fs::create_dir_all(&dir).map_err(|e| {
                ServiceError::invalid_spec(format!(
                    "cannot prepare working directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            dir
        }
        None => code_dir.clone(),
    };

    Ok(RunnerStrategy {
        preludes,
        main,
        working_dir,
        env: job_environment(spec, workspace, staged_inputs),
    })
}

/// Extra env, overlaid by staged inputs, overlaid by the reserved variables
pub fn job_environment(
    spec: &JobSpec,
    workspace: &Workspace,
    staged_inputs: &BTreeMap<String, PathBuf>,
) -> BTreeMap<String, String> {
    let mut env = spec.env.clone();
    for (name, path) in staged_inputs {
        env.insert(name.clone(), path.to_string_lossy().into_owned());
    }
    env.insert(
        OUTPUT_DIR_VAR.to_string(),
        workspace.outputs_dir().to_string_lossy().into_owned(),
    );
    env.insert(
        CODE_DIR_VAR.to_string(),
        workspace.code_dir().to_string_lossy().into_owned(),
    );
    env.insert(JOB_ID_VAR.to_string(), workspace.id().to_string());
    env
}

fn command(argv: Vec<String>, language: &str) -> ServiceResult<CommandLine> {
    CommandLine::from_argv(argv).ok_or_else(|| ServiceError::ProcessLaunch {
        program: String::new(),
        reason: format!("empty command template for language '{}'", language),
    })
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> ServiceResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let launch_error = |e: std::io::Error| ServiceError::ProcessLaunch {
        program: path.display().to_string(),
        reason: format!("cannot mark executable: {}", e),
    };
    let mut permissions = fs::metadata(path).map_err(launch_error)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions).map_err(launch_error)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> ServiceResult<()> {
    Ok(())
}
