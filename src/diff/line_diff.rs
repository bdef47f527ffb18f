//! Line-granular edits computed from full before/after texts.
//!
//! Used when a peer supplies whole documents (`openDiff`) or when the tool
//! layer rewrites a file wholesale. Each hunk of a zero-context line diff
//! becomes one `Edit`, so the user can accept or reject hunks individually.

use diffy::DiffOptions;

use crate::diff::text::LineIndex;
use crate::models::{Edit, Range};
use crate::Result;

/// Compute the edits that turn `before` into `after`.
///
/// The edits address `before` and never overlap. Identical texts yield no
/// edits.
///
/// # Errors
///
/// Returns `AppError::OutOfBounds` if a hunk cannot be mapped onto `before`.
pub fn edits_from_texts(before: &str, after: &str) -> Result<Vec<Edit>> {
    if before == after {
        return Ok(Vec::new());
    }

    let mut options = DiffOptions::new();
    options.set_context_len(0);
    let patch = options.create_patch(before, after);

    let old_index = LineIndex::new(before);
    let new_index = LineIndex::new(after);
    let mut edits = Vec::with_capacity(patch.hunks().len());
    // Lines added minus lines removed by the hunks seen so far. Empty hunk
    // ranges are located through the opposite side plus this delta, which
    // sidesteps the unified-diff convention for zero-length starts.
    let mut delta = 0isize;

    for hunk in patch.hunks() {
        let (old, new) = (hunk.old_range(), hunk.new_range());
        let (old_line, new_line) = if old.len() > 0 {
            let old_line = old.start() - 1;
            (old_line, old_line.saturating_add_signed(delta))
        } else {
            let new_line = new.start().saturating_sub(1);
            (new_line.saturating_add_signed(-delta), new_line)
        };

        let old_start = old_index.line_start(old_line);
        let old_end = old_index.line_start(old_line + old.len());
        let new_start = new_index.line_start(new_line);
        let new_end = new_index.line_start(new_line + new.len());

        let range = Range::new(
            old_index.position_of(old_start)?,
            old_index.position_of(old_end)?,
        );
        edits.push(
            Edit::new(range, &after[new_start..new_end]).with_old_text(&before[old_start..old_end]),
        );

        delta += isize::try_from(new.len()).unwrap_or(isize::MAX)
            - isize::try_from(old.len()).unwrap_or(isize::MAX);
    }

    Ok(edits)
}
