// Local Resolvers
// Pass-through resolution for local paths and a scheme-to-directory mirror

use crate::resolver::{split_scheme, LocationResolver, ResolutionError};
use crate::utils::{expand_home, is_contained_relative};

use std::fs;
use std::path::{Path, PathBuf};

/// Resolves plain local paths; any `scheme://` reference is rejected
#[derive(Debug, Clone, Default)]
pub struct LocalResolver;

impl LocalResolver {
    pub fn new() -> Self {
        Self
    }

    fn local_path(reference: &str) -> Result<PathBuf, ResolutionError> {
        if reference.trim().is_empty() {
            return Err(ResolutionError::Malformed(reference.to_string()));
        }
        if split_scheme(reference).is_some() {
            return Err(ResolutionError::UnsupportedScheme(reference.to_string()));
        }
        Ok(expand_home(reference))
    }
}

impl LocationResolver for LocalResolver {
    fn resolve(&self, reference: &str) -> Result<PathBuf, ResolutionError> {
        let path = Self::local_path(reference)?;
        existing(reference, path)
    }

    fn resolve_output(&self, reference: &str) -> Result<PathBuf, ResolutionError> {
        let path = Self::local_path(reference)?;
        ensure_dir(reference, path)
    }
}

/// Maps `<scheme>://a/b` onto `<root>/a/b`.
///
/// Stands in for a remote store whose content has been mirrored to local
/// disk. References without a scheme are resolved like `LocalResolver`.
#[derive(Debug, Clone)]
pub struct MirrorResolver {
    scheme: String,
    root: PathBuf,
}

impl MirrorResolver {
    pub fn new(scheme: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            scheme: scheme.into(),
            root: root.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a reference to its mirrored location without touching the filesystem
    fn map(&self, reference: &str) -> Result<PathBuf, ResolutionError> {
        match split_scheme(reference) {
            Some((scheme, rest)) if scheme == self.scheme => {
                let rest = rest.trim_matches('/');
                if !is_contained_relative(Path::new(rest)) {
                    return Err(ResolutionError::Malformed(reference.to_string()));
                }
                Ok(self.root.join(rest))
            }
            Some(_) => Err(ResolutionError::UnsupportedScheme(reference.to_string())),
            None => LocalResolver::local_path(reference),
        }
    }
}

impl LocationResolver for MirrorResolver {
    fn resolve(&self, reference: &str) -> Result<PathBuf, ResolutionError> {
        let path = self.map(reference)?;
        existing(reference, path)
    }

    fn resolve_output(&self, reference: &str) -> Result<PathBuf, ResolutionError> {
        let path = self.map(reference)?;
        ensure_dir(reference, path)
    }
}

fn existing(reference: &str, path: PathBuf) -> Result<PathBuf, ResolutionError> {
    match fs::metadata(&path) {
        Ok(_) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ResolutionError::NotFound(reference.to_string()))
        }
        Err(source) => Err(ResolutionError::Io {
            reference: reference.to_string(),
            source,
        }),
    }
}

fn ensure_dir(reference: &str, path: PathBuf) -> Result<PathBuf, ResolutionError> {
    fs::create_dir_all(&path).map_err(|source| ResolutionError::Io {
        reference: reference.to_string(),
        source,
    })?;
    Ok(path)
}
