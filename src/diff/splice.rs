//! Multi-edit splicing against a single snapshot.
//!
//! Every edit of a proposal addresses the same snapshot. Edits are resolved
//! to byte offsets, checked for overlap, then spliced back-to-front so that
//! no splice shifts the offsets of an edit still waiting to be applied.

use crate::diff::text::LineIndex;
use crate::models::{Edit, Range};
use crate::{AppError, Result};

/// An edit resolved to byte offsets in its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEdit<'e> {
    /// Position of the edit in the caller's sequence.
    pub index: usize,
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
    /// The edit itself.
    pub edit: &'e Edit,
}

/// Resolve `edits` against `text`, sorted ascending by `(start, end)`.
///
/// # Errors
///
/// - `AppError::OutOfBounds` if a range addresses a location outside `text`
///   or has `start > end`.
/// - `AppError::Overlap` if two ranges intersect, or two insertions target
///   the same offset.
pub fn resolve_edits<'e, I>(text: &str, edits: I) -> Result<Vec<ResolvedEdit<'e>>>
where
    I: IntoIterator<Item = &'e Edit>,
{
    let index = LineIndex::new(text);
    let mut resolved = Vec::new();
    for (i, edit) in edits.into_iter().enumerate() {
        if !edit.range.is_ordered() {
            return Err(AppError::OutOfBounds(format!(
                "edit {i} has start after end ({})",
                edit.range
            )));
        }
        let start = index
            .offset_of(edit.range.start)
            .map_err(|err| AppError::OutOfBounds(format!("edit {i}: {err}")))?;
        let end = index
            .offset_of(edit.range.end)
            .map_err(|err| AppError::OutOfBounds(format!("edit {i}: {err}")))?;
        resolved.push(ResolvedEdit {
            index: i,
            start,
            end,
            edit,
        });
    }

    resolved.sort_by_key(|r| (r.start, r.end));
    for pair in resolved.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let both_inserts_at_same_point =
            prev.start == prev.end && next.start == next.end && prev.start == next.start;
        if next.start < prev.end || both_inserts_at_same_point {
            return Err(AppError::Overlap(format!(
                "edit {} ({}) overlaps edit {} ({})",
                prev.index, prev.edit.range, next.index, next.edit.range
            )));
        }
    }
    Ok(resolved)
}

/// Splice every edit into a copy of `text`.
///
/// Validation happens before any splice, so an error never yields a
/// partially edited result.
///
/// # Errors
///
/// See [`resolve_edits`].
pub fn splice_edits<'e, I>(text: &str, edits: I) -> Result<String>
where
    I: IntoIterator<Item = &'e Edit>,
{
    let resolved = resolve_edits(text, edits)?;
    Ok(splice_resolved(text, &resolved))
}

/// Splice pre-validated edits back-to-front.
#[must_use]
pub fn splice_resolved(text: &str, resolved: &[ResolvedEdit<'_>]) -> String {
    let mut out = text.to_owned();
    for r in resolved.iter().rev() {
        out.replace_range(r.start..r.end, &r.edit.new_text);
    }
    out
}

/// Smallest single replacement turning `text` into `spliced`.
///
/// Given the resolved edits that produced `spliced`, returns the range in
/// `text` covering all of them and the text that replaces it. Applying this
/// one replacement is equivalent to applying every edit.
///
/// # Errors
///
/// Returns `AppError::OutOfBounds` if the covering offsets cannot be mapped
/// back to positions.
pub fn covering_replacement(
    text: &str,
    spliced: &str,
    resolved: &[ResolvedEdit<'_>],
) -> Result<Option<(Range, String)>> {
    let (Some(first), Some(last_end)) = (resolved.first(), resolved.iter().map(|r| r.end).max())
    else {
        return Ok(None);
    };
    let start = first.start;
    let tail = text.len() - last_end;
    let replacement = spliced[start..spliced.len() - tail].to_owned();
    let index = LineIndex::new(text);
    let range = Range::new(index.position_of(start)?, index.position_of(last_end)?);
    Ok(Some((range, replacement)))
}

/// Translates snapshot coordinates into a document that already carries some
/// of the snapshot's edits.
///
/// Accepting edits one at a time changes the document between decisions. The
/// stored ranges of the remaining edits still address the snapshot; a
/// `Rebaser` shifts them past the accepted edits so they address the live
/// text instead.
#[derive(Debug, Clone)]
pub struct Rebaser {
    snapshot: String,
    base: String,
    /// `(start, end, delta)` of every applied edit in snapshot offsets.
    applied: Vec<(usize, usize, isize)>,
}

impl Rebaser {
    /// Build a rebaser for `snapshot` with `applied` already in the document.
    ///
    /// # Errors
    ///
    /// Propagates validation errors from [`resolve_edits`].
    pub fn new<'e, I>(snapshot: &str, applied: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'e Edit>,
    {
        let resolved = resolve_edits(snapshot, applied)?;
        let base = splice_resolved(snapshot, &resolved);
        let applied = resolved
            .iter()
            .map(|r| {
                let delta = signed(r.edit.new_text.len()) - signed(r.end - r.start);
                (r.start, r.end, delta)
            })
            .collect();
        Ok(Self {
            snapshot: snapshot.to_owned(),
            base,
            applied,
        })
    }

    /// The document text implied by the snapshot plus the applied edits.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Re-express `edit` (in snapshot coordinates) against [`Self::base`].
    ///
    /// # Errors
    ///
    /// - `AppError::OutOfBounds` if `edit` does not address the snapshot.
    /// - `AppError::Overlap` if `edit` intersects an applied edit.
    pub fn rebase(&self, edit: &Edit) -> Result<Edit> {
        let snapshot_index = LineIndex::new(&self.snapshot);
        let start = snapshot_index.offset_of(edit.range.start)?;
        let end = snapshot_index.offset_of(edit.range.end)?;
        if start > end {
            return Err(AppError::OutOfBounds(format!(
                "edit has start after end ({})",
                edit.range
            )));
        }

        let mut shift = 0isize;
        for &(a_start, a_end, delta) in &self.applied {
            let same_point_inserts = a_start == a_end && start == end && a_start == start;
            if !same_point_inserts && a_end <= start {
                shift += delta;
            } else if same_point_inserts || a_start < end {
                return Err(AppError::Overlap(format!(
                    "edit at {} overlaps an applied edit",
                    edit.range
                )));
            }
        }

        let base_index = LineIndex::new(&self.base);
        let range = Range::new(
            base_index.position_of(shifted(start, shift)?)?,
            base_index.position_of(shifted(end, shift)?)?,
        );
        Ok(Edit {
            range,
            old_text: edit.old_text.clone(),
            new_text: edit.new_text.clone(),
        })
    }
}

fn signed(value: usize) -> isize {
    isize::try_from(value).unwrap_or(isize::MAX)
}

fn shifted(offset: usize, shift: isize) -> Result<usize> {
    offset
        .checked_add_signed(shift)
        .ok_or_else(|| AppError::OutOfBounds(format!("offset {offset} shifted out of range")))
}
