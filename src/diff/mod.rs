//! Edit arithmetic, application, and path validation.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

pub mod applier;
pub mod line_diff;
pub mod splice;
pub mod text;
pub mod writer;

pub use applier::{ApplyReport, EditApplier};

/// Resolve `candidate` to an absolute normalized path inside one of `roots`.
///
/// Relative candidates are joined to the first root. `..` components are
/// resolved lexically and may not climb above the filesystem root.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if no root is configured, the path
/// escapes via `..`, or the normalized path lies outside every root.
pub fn validate_workspace_path(roots: &[PathBuf], candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let Some(first) = roots.first() else {
        return Err(AppError::PathViolation("no workspace roots configured".into()));
    };

    let candidate = candidate.as_ref();
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        first.join(candidate)
    };

    let absolute = normalize(&joined)?;
    if roots.iter().any(|root| absolute.starts_with(root)) {
        Ok(absolute)
    } else {
        Err(AppError::PathViolation(format!(
            "{} is outside the workspace",
            absolute.display()
        )))
    }
}

/// Lexically normalize an absolute path, resolving `.` and `..`.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if `..` climbs above the root.
pub fn normalize(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() || normalized.as_os_str().is_empty() {
                    return Err(AppError::PathViolation(
                        "path attempts to escape workspace".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                normalized.push(component.as_os_str());
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    Ok(normalized)
}
