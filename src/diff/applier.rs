//! Edit application against an editing surface.
//!
//! All edits of one call are validated and spliced on an in-memory copy of
//! the document first. Only then is the surface touched, with one
//! replacement covering every edit, so a failure anywhere leaves the
//! document exactly as it was.
//!
//! Staleness policy: a document with unsaved changes is reloaded from its
//! persisted state before the edits are applied. Unsaved speculative text is
//! discarded so the edit coordinates stay valid. If the reloaded text still
//! differs from the base the edits were computed against, the call fails
//! with `AppError::StaleDocument`.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::diff::splice::{covering_replacement, resolve_edits, splice_resolved};
use crate::models::proposal::content_digest;
use crate::models::Edit;
use crate::surface::{Annotation, DocumentHandle, EditingSurface};
use crate::{AppError, Result};

/// Outcome of a successful [`EditApplier::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// File the edits were applied to.
    pub file: PathBuf,
    /// Number of edits applied.
    pub edits_applied: usize,
    /// Whether unsaved buffer changes were discarded first.
    pub reloaded: bool,
}

/// Applies and reverts edit sets on an [`EditingSurface`].
#[derive(Debug)]
pub struct EditApplier<S> {
    surface: S,
}

impl<S: EditingSurface> EditApplier<S> {
    /// Wrap `surface`.
    #[must_use]
    pub fn new(surface: S) -> Self {
        Self { surface }
    }

    /// Borrow the underlying surface.
    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Mutably borrow the underlying surface.
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Persisted content of `file`, used as the snapshot of a new proposal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read.
    pub fn snapshot(&mut self, file: &Path) -> Result<String> {
        let doc = self.surface.open(file)?;
        self.surface.persisted_text(doc)
    }

    /// Apply `edits`, computed against `base`, to `file` and persist it.
    ///
    /// The file is revealed afterwards.
    ///
    /// # Errors
    ///
    /// - `AppError::StaleDocument` if the document differs from `base` after reload.
    /// - `AppError::Overlap` / `AppError::OutOfBounds` for invalid edits.
    /// - `AppError::Apply` / `AppError::Io` if the surface rejects the change.
    ///
    /// The document is byte-identical to its pre-call state on every error.
    pub fn apply(&mut self, file: &Path, edits: &[Edit], base: &str) -> Result<ApplyReport> {
        if edits.is_empty() {
            debug!(path = %file.display(), "nothing to apply");
            return Ok(ApplyReport {
                file: file.to_path_buf(),
                edits_applied: 0,
                reloaded: false,
            });
        }
        let doc = self.surface.open(file)?;
        let reloaded = self.discard_unsaved(doc, file)?;
        self.write_edits(doc, file, edits, base)?;

        if let Err(err) = self.surface.save(doc) {
            self.roll_back(doc, file);
            return Err(err);
        }
        if let Err(err) = self.surface.reveal(doc) {
            warn!(path = %file.display(), %err, "failed to reveal document after apply");
        }

        info!(path = %file.display(), edits = edits.len(), reloaded, "edits applied");
        Ok(ApplyReport {
            file: file.to_path_buf(),
            edits_applied: edits.len(),
            reloaded,
        })
    }

    /// Apply `edits` to the buffer without saving, as a speculative preview.
    ///
    /// A later [`Self::revert`] removes the preview; a later [`Self::apply`]
    /// discards it through the staleness policy.
    ///
    /// # Errors
    ///
    /// Same as [`Self::apply`], minus persistence failures.
    pub fn preview(&mut self, file: &Path, edits: &[Edit], base: &str) -> Result<()> {
        let doc = self.surface.open(file)?;
        self.discard_unsaved(doc, file)?;
        self.write_edits(doc, file, edits, base)?;
        debug!(path = %file.display(), edits = edits.len(), "speculative preview applied");
        Ok(())
    }

    /// Undo the most recent apply or preview on `file`.
    ///
    /// Assumes nothing else edited the document in between. Returns whether
    /// an undo step existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if restoring persisted state fails.
    pub fn revert(&mut self, file: &Path) -> Result<bool> {
        let doc = self.surface.open(file)?;
        let reverted = self.surface.revert(doc)?;
        info!(path = %file.display(), reverted, "revert requested");
        Ok(reverted)
    }

    /// Whether `file`'s buffer differs from its persisted state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be opened.
    pub fn has_unsaved(&mut self, file: &Path) -> Result<bool> {
        let doc = self.surface.open(file)?;
        self.surface.is_dirty(doc)
    }

    /// Replace the annotations shown on `file`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be opened.
    pub fn annotate(&mut self, file: &Path, annotations: Vec<Annotation>) -> Result<()> {
        let doc = self.surface.open(file)?;
        if annotations.is_empty() {
            self.surface.clear_annotations(doc)
        } else {
            self.surface.set_annotations(doc, annotations)
        }
    }

    fn discard_unsaved(&mut self, doc: DocumentHandle, file: &Path) -> Result<bool> {
        if !self.surface.is_dirty(doc)? {
            return Ok(false);
        }
        warn!(
            path = %file.display(),
            "document has unsaved changes; reloading persisted state before applying"
        );
        self.surface.reload(doc)?;
        Ok(true)
    }

    fn write_edits(
        &mut self,
        doc: DocumentHandle,
        file: &Path,
        edits: &[Edit],
        base: &str,
    ) -> Result<()> {
        let current = self.surface.text(doc)?;
        if current != base {
            let (expected, found) = (content_digest(base), content_digest(&current));
            return Err(AppError::StaleDocument(format!(
                "{} changed since the edits were computed (expected sha256 {}, found {})",
                file.display(),
                &expected[..12],
                &found[..12]
            )));
        }

        let resolved = resolve_edits(&current, edits)?;
        let spliced = splice_resolved(&current, &resolved);
        let Some((range, replacement)) = covering_replacement(&current, &spliced, &resolved)?
        else {
            return Ok(());
        };

        self.surface
            .apply_range(doc, &range, &replacement)
            .map_err(|err| AppError::Apply(format!("{}: {err}", file.display())))?;

        if self.surface.text(doc)? != spliced {
            self.roll_back(doc, file);
            return Err(AppError::Apply(format!(
                "{}: surface produced unexpected text",
                file.display()
            )));
        }
        Ok(())
    }

    fn roll_back(&mut self, doc: DocumentHandle, file: &Path) {
        match self.surface.revert(doc) {
            Ok(true) => debug!(path = %file.display(), "rolled back partial apply"),
            Ok(false) => warn!(path = %file.display(), "nothing to roll back"),
            Err(err) => warn!(path = %file.display(), %err, "roll back failed"),
        }
    }
}
