//! Line annotations derived from a proposal.
//!
//! Annotations hold no state of their own: [`project`] recomputes them from
//! the store's current proposal every time it changes, so what the user sees
//! cannot drift from what the store records.

use serde::{Deserialize, Serialize};

use crate::diff::splice::Rebaser;
use crate::models::{Edit, EditStatus, Proposal};
use crate::Result;

/// Visual category of an annotation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Text will be inserted at this line.
    Insert,
    /// Text on this line will be removed.
    Delete,
    /// Text on this line will be replaced.
    Replace,
}

/// One line-keyed overlay with hover text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    /// Zero-based line in the live document.
    pub line: u32,
    /// Index of the edit within its proposal.
    pub edit_index: usize,
    /// Visual category.
    pub kind: AnnotationKind,
    /// Text shown on hover.
    pub hover: String,
}

/// Annotations for every pending edit of `proposal`, in live-document lines.
///
/// Ranges are shifted past edits already accepted, so the overlay lines up
/// with the document as it stands after partial acceptance.
///
/// # Errors
///
/// Returns `AppError::OutOfBounds` or `AppError::Overlap` if the proposal's
/// edits do not address its snapshot.
pub fn project(proposal: &Proposal) -> Result<Vec<Annotation>> {
    let rebaser = Rebaser::new(&proposal.snapshot, proposal.accepted_edits())?;
    let mut annotations = Vec::new();
    for (index, (edit, status)) in proposal.edits.iter().zip(&proposal.statuses).enumerate() {
        if *status != EditStatus::Pending {
            continue;
        }
        let live = rebaser.rebase(edit)?;
        let kind = classify(&live);
        let hover = hover_text(&proposal.description, index, edit);
        let first = live.range.start.line;
        let mut last = live.range.end.line;
        if last > first && live.range.end.character == 0 {
            last -= 1;
        }
        for line in first..=last {
            annotations.push(Annotation {
                line,
                edit_index: index,
                kind,
                hover: hover.clone(),
            });
        }
    }
    Ok(annotations)
}

fn classify(edit: &Edit) -> AnnotationKind {
    if edit.range.is_empty() {
        AnnotationKind::Insert
    } else if edit.new_text.is_empty() {
        AnnotationKind::Delete
    } else {
        AnnotationKind::Replace
    }
}

fn hover_text(description: &str, index: usize, edit: &Edit) -> String {
    let mut hover = format!("edit {index}");
    if !description.is_empty() {
        hover.push_str(": ");
        hover.push_str(description);
    }
    match edit.old_text.as_deref() {
        Some(old) if !old.is_empty() => {
            hover.push_str(&format!("\n- {}\n+ {}", old.trim_end(), edit.new_text.trim_end()));
        }
        _ => hover.push_str(&format!("\n+ {}", edit.new_text.trim_end())),
    }
    hover
}
