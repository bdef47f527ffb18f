//! Agent-facing file tools built on the bridge.
//!
//! Both tools read the file as it is on disk, translate the request into
//! range edits, and hand them to [`AgentBridge::propose_edit`].

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::diff::line_diff::edits_from_texts;
use crate::diff::text::LineIndex;
use crate::diff::writer::write_full_file;
use crate::driver::bridge::{AgentBridge, ProposeOutcome};
use crate::models::{Edit, Range};
use crate::{AppError, Result};

/// Replace the first occurrence of `old` in `path` with `new`.
///
/// # Errors
///
/// - `AppError::Apply` if `old` is empty.
/// - `AppError::NotFound` if `old` does not occur in the file.
/// - `AppError::Io` if the file cannot be read.
/// - Anything [`AgentBridge::propose_edit`] returns.
pub async fn edit_file(
    bridge: &AgentBridge,
    path: impl AsRef<Path>,
    old: &str,
    new: &str,
    description: &str,
) -> Result<ProposeOutcome> {
    if old.is_empty() {
        return Err(AppError::Apply("text to replace must not be empty".into()));
    }
    let file = bridge.resolve(path)?;
    let content = fs::read_to_string(&file)?;
    let Some(start) = content.find(old) else {
        return Err(AppError::NotFound(format!(
            "text to replace not found in {}",
            file.display()
        )));
    };
    if old == new {
        return Ok(ProposeOutcome::Unchanged);
    }

    let index = LineIndex::new(&content);
    let range = Range::new(
        index.position_of(start)?,
        index.position_of(start + old.len())?,
    );
    debug!(path = %file.display(), ?range, "edit_file");
    let edit = Edit::new(range, new).with_old_text(old);
    bridge.propose_edit(&file, vec![edit], description).await
}

/// Replace the whole content of `path` with `content`.
///
/// A file that does not exist yet is created directly; there is nothing to
/// review against.
///
/// # Errors
///
/// - `AppError::Io` if the file cannot be read or created.
/// - Anything [`AgentBridge::propose_edit`] returns.
pub async fn write_file(
    bridge: &AgentBridge,
    path: impl AsRef<Path>,
    content: &str,
    description: &str,
) -> Result<ProposeOutcome> {
    let file = bridge.resolve(path)?;
    if !file.exists() {
        return write_full_file(&file, content).map(ProposeOutcome::from);
    }

    let current = fs::read_to_string(&file)?;
    let edits = edits_from_texts(&current, content)?;
    if edits.is_empty() {
        return Ok(ProposeOutcome::Unchanged);
    }
    bridge.propose_edit(&file, edits, description).await
}
