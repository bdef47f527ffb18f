//! Atomic file writing.
//!
//! Creates parent directories as needed and writes through a temporary file
//! in the same directory that is renamed over the target, so readers never
//! observe a partially written file. An existing target keeps its
//! permissions.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Summary of a completed file write operation.
#[derive(Debug, Clone)]
pub struct WriteSummary {
    /// Absolute path of the written file.
    pub path: PathBuf,
    /// Number of bytes written.
    pub bytes_written: usize,
}

/// Atomically replace the contents of `path` with `content`.
///
/// # Errors
///
/// Returns `AppError::Io` on directory creation, temp file write, or rename
/// failures. The target is untouched on error.
pub fn write_full_file(path: &Path, content: &str) -> Result<WriteSummary> {
    persist(path, content, false)
}

/// Like [`write_full_file`], but the file (and a freshly created parent
/// directory) are readable by the owner only.
///
/// # Errors
///
/// Returns `AppError::Io` on any write or permission failure.
pub fn write_private_file(path: &Path, content: &str) -> Result<WriteSummary> {
    persist(path, content, true)
}

fn persist(path: &Path, content: &str, private: bool) -> Result<WriteSummary> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;

    if !parent.exists() {
        std::fs::create_dir_all(parent).map_err(|err| {
            AppError::Io(format!(
                "failed to create parent directories for {}: {err}",
                path.display()
            ))
        })?;
        if private {
            restrict_permissions(parent, 0o700)?;
        }
    }

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;

    let bytes = content.as_bytes();
    tmp.write_all(bytes)
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    if private {
        restrict_permissions(tmp.path(), 0o600)?;
    } else if let Ok(existing) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), existing.permissions()).map_err(|err| {
            AppError::Io(format!(
                "failed to carry permissions of {} over: {err}",
                path.display()
            ))
        })?;
    }

    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist file to {}: {err}", path.display()))
    })?;

    Ok(WriteSummary {
        path: path.to_path_buf(),
        bytes_written: bytes.len(),
    })
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|err| {
        AppError::Io(format!(
            "failed to restrict permissions on {}: {err}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
