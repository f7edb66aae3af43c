// Archive Extraction
// Unpacks zip and tar(.gz) code bundles into a workspace's code directory

use crate::workspace::StagingError;

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

/// Archive formats recognised for code bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    /// Detect the archive kind from the file name
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Extract `archive` into `dest`, rejecting entries that would land outside it
pub fn extract(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<(), StagingError> {
    let file = File::open(archive).map_err(|source| StagingError::UnreadableSource {
        path: archive.to_path_buf(),
        source,
    })?;

    match kind {
        ArchiveKind::Zip => extract_zip(archive, file, dest),
        ArchiveKind::Tar => extract_tar(archive, file, dest),
        ArchiveKind::TarGz => extract_tar(archive, GzDecoder::new(file), dest),
    }
}

fn extract_tar<R: Read>(archive: &Path, reader: R, dest: &Path) -> Result<(), StagingError> {
    let bad_archive = |e: io::Error| StagingError::Archive {
        path: archive.to_path_buf(),
        message: e.to_string(),
    };

    let mut tar = tar::Archive::new(reader);
    for entry in tar.entries().map_err(bad_archive)? {
        let mut entry = entry.map_err(bad_archive)?;
        let entry_path = entry
            .path()
            .map(|p| p.into_owned())
            .map_err(bad_archive)?;
        if !entry.unpack_in(dest).map_err(bad_archive)? {
            return Err(StagingError::UnsafeEntry(entry_path));
        }
    }
    Ok(())
}

fn extract_zip(archive: &Path, file: File, dest: &Path) -> Result<(), StagingError> {
    let bad_archive = |message: String| StagingError::Archive {
        path: archive.to_path_buf(),
        message,
    };

    let mut zip = zip::ZipArchive::new(file).map_err(|e| bad_archive(e.to_string()))?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| bad_archive(e.to_string()))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| StagingError::UnsafeEntry(entry.name().into()))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| bad_archive(e.to_string()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| bad_archive(e.to_string()))?;
        }
        let mut out = File::create(&target).map_err(|e| bad_archive(e.to_string()))?;
        io::copy(&mut entry, &mut out).map_err(|e| bad_archive(e.to_string()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))
                .map_err(|e| bad_archive(e.to_string()))?;
        }
    }
    Ok(())
}
