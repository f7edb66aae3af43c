// Workspace Manager
// Allocates `<root>/<job_id>/{code,inputs,outputs}` and stages content into it

use crate::config::InputStaging;
use crate::job::JobId;
use crate::workspace::archive::{self, ArchiveKind};
use crate::workspace::fsutil;
use crate::workspace::{StagingError, WorkspaceError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CODE_DIR: &str = "code";
pub const INPUTS_DIR: &str = "inputs";
pub const OUTPUTS_DIR: &str = "outputs";
pub const MANIFEST_FILE: &str = "job.yaml";

/// A job's directory tree; its identity is the job id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    id: JobId,
    root: PathBuf,
}

impl Workspace {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn code_dir(&self) -> PathBuf {
        self.root.join(CODE_DIR)
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join(INPUTS_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join(OUTPUTS_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }
}

/// One staged input as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestInput {
    pub reference: String,
    pub staged: PathBuf,
}

/// Description of a job written next to its workspace directories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    pub job_id: JobId,
    pub name: String,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, ManifestInput>,
    #[serde(default)]
    pub output: Option<String>,
    /// Names of the variables injected into the job environment
    #[serde(default)]
    pub environment: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Creates and populates job workspaces under a common root.
///
/// Workspaces are never deleted here; they stay on disk for inspection
/// until an external reaper removes them.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    staging: InputStaging,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging: InputStaging::Copy,
        }
    }

    pub fn with_input_staging(mut self, staging: InputStaging) -> Self {
        self.staging = staging;
        self
    }

    /// Root directory holding all job workspaces
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace handle for an id, without touching the filesystem
    pub fn workspace_for(&self, id: JobId) -> Workspace {
        Workspace {
            id,
            root: self.root.join(id.to_string()),
        }
    }

    /// Create the workspace tree for a job
    pub fn create(&self, id: JobId) -> Result<Workspace, WorkspaceError> {
        fs::create_dir_all(&self.root).map_err(|e| WorkspaceError::io(&self.root, e))?;

        let workspace = self.workspace_for(id);
        match fs::create_dir(workspace.root()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::Collision(workspace.root().to_path_buf()));
            }
            Err(e) => return Err(WorkspaceError::io(workspace.root(), e)),
        }

        for dir in [
            workspace.code_dir(),
            workspace.inputs_dir(),
            workspace.outputs_dir(),
        ] {
            fs::create_dir(&dir).map_err(|e| WorkspaceError::io(&dir, e))?;
        }

        tracing::debug!(job_id = %id, path = %workspace.root().display(), "Workspace created");
        Ok(workspace)
    }

    /// Stage code into `code/`.
    ///
    /// Directories are copied recursively, recognised archives are extracted,
    /// and any other file is copied in under its own name.
    pub fn stage_code(&self, workspace: &Workspace, source: &Path) -> Result<(), StagingError> {
        let code_dir = workspace.code_dir();
        let metadata = fs::metadata(source).map_err(|e| StagingError::UnreadableSource {
            path: source.to_path_buf(),
            source: e,
        })?;

        if metadata.is_dir() {
            fsutil::copy_dir_recursive(source, &code_dir).map_err(|e| StagingError::Copy {
                source_path: source.to_path_buf(),
                dest: code_dir.clone(),
                source: e,
            })?;
        } else if let Some(kind) = ArchiveKind::detect(source) {
            archive::extract(source, kind, &code_dir)?;
        } else {
            let name = source.file_name().ok_or_else(|| StagingError::UnreadableSource {
                path: source.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            })?;
            let dest = code_dir.join(name);
            fs::copy(source, &dest).map_err(|e| StagingError::Copy {
                source_path: source.to_path_buf(),
                dest,
                source: e,
            })?;
        }

        tracing::debug!(job_id = %workspace.id(), source = %source.display(), "Code staged");
        Ok(())
    }

    /// Stage resolved inputs into `inputs/`.
    ///
    /// Each input keeps its original file name. Inputs are processed in
    /// variable-name order; when a name is already taken the later input is
    /// prefixed with its variable name, so placement is deterministic.
    /// Returns variable name -> staged path.
    pub fn stage_inputs(
        &self,
        workspace: &Workspace,
        resolved: &BTreeMap<String, PathBuf>,
    ) -> Result<BTreeMap<String, PathBuf>, StagingError> {
        let inputs_dir = workspace.inputs_dir();
        let mut taken = HashSet::new();
        let mut staged = BTreeMap::new();

        for (var, source) in resolved {
            let base = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| var.clone());
            let file_name = unique_name(&mut taken, var, &base);
            let dest = inputs_dir.join(&file_name);

            fsutil::place(source, &dest, self.staging).map_err(|e| StagingError::Copy {
                source_path: source.clone(),
                dest: dest.clone(),
                source: e,
            })?;
            staged.insert(var.clone(), dest);
        }

        tracing::debug!(job_id = %workspace.id(), count = staged.len(), "Inputs staged");
        Ok(staged)
    }

    /// Ensure `outputs/` exists and is writable. Nothing is deleted.
    pub fn finalize(&self, workspace: &Workspace) -> Result<(), WorkspaceError> {
        let outputs = workspace.outputs_dir();
        fs::create_dir_all(&outputs).map_err(|e| WorkspaceError::io(&outputs, e))?;
        let metadata = fs::metadata(&outputs).map_err(|e| WorkspaceError::io(&outputs, e))?;
        if metadata.permissions().readonly() {
            return Err(WorkspaceError::NotWritable(outputs));
        }
        Ok(())
    }

    /// Write the job manifest at the workspace root
    pub fn write_manifest(
        &self,
        workspace: &Workspace,
        manifest: &WorkspaceManifest,
    ) -> Result<(), WorkspaceError> {
        let content =
            serde_yaml::to_string(manifest).map_err(|e| WorkspaceError::Manifest(e.to_string()))?;
        let path = workspace.manifest_path();
        fs::write(&path, content).map_err(|e| WorkspaceError::io(&path, e))
    }

    /// Read back a previously written manifest
    pub fn read_manifest(&self, workspace: &Workspace) -> Result<WorkspaceManifest, WorkspaceError> {
        let path = workspace.manifest_path();
        let content = fs::read_to_string(&path).map_err(|e| WorkspaceError::io(&path, e))?;
        serde_yaml::from_str(&content).map_err(|e| WorkspaceError::Manifest(e.to_string()))
    }

    /// Files produced under `outputs/`, relative and sorted
    pub fn list_outputs(&self, workspace: &Workspace) -> Result<Vec<PathBuf>, WorkspaceError> {
        let outputs = workspace.outputs_dir();
        fsutil::list_files(&outputs).map_err(|e| WorkspaceError::io(&outputs, e))
    }

    /// Copy the contents of `outputs/` to `destination`
    pub fn publish_outputs(
        &self,
        workspace: &Workspace,
        destination: &Path,
    ) -> Result<(), WorkspaceError> {
        fsutil::copy_dir_recursive(&workspace.outputs_dir(), destination)
            .map_err(|e| WorkspaceError::io(destination, e))
    }
}

fn unique_name(taken: &mut HashSet<String>, var: &str, base: &str) -> String {
    let mut candidate = base.to_string();
    let mut attempt = 0;
    while taken.contains(&candidate) {
        attempt += 1;
        candidate = if attempt == 1 {
            format!("{}_{}", var, base)
        } else {
            format!("{}_{}_{}", var, attempt, base)
        };
    }
    taken.insert(candidate.clone());
    candidate
}
