//! Editing-surface abstraction.
//!
//! The edit applier and dispatcher talk to the document through this trait
//! rather than to a concrete editor. [`file::FileSurface`] is the headless,
//! filesystem-backed implementation used by the host binary and by the
//! agent bridge in standalone mode.

pub mod file;
pub mod presentation;

use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::Range;
use crate::Result;

pub use file::FileSurface;
pub use presentation::{Annotation, AnnotationKind};

/// Opaque handle to an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentHandle(pub u64);

impl Display for DocumentHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Operations an editing surface exposes to the applier and dispatcher.
pub trait EditingSurface: Send {
    /// Open `file`, returning the same handle for repeated opens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    fn open(&mut self, file: &Path) -> Result<DocumentHandle>;

    /// Current buffer text, including unsaved changes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown handle.
    fn text(&self, doc: DocumentHandle) -> Result<String>;

    /// Text of the authoritative persisted state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown handle.
    fn persisted_text(&self, doc: DocumentHandle) -> Result<String>;

    /// Whether the buffer holds unsaved changes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown handle.
    fn is_dirty(&self, doc: DocumentHandle) -> Result<bool>;

    /// Replace the buffer with the persisted state, discarding unsaved changes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the persisted state cannot be read.
    fn reload(&mut self, doc: DocumentHandle) -> Result<()>;

    /// Replace `range` of the buffer with `text` as one undoable step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::OutOfBounds` if `range` does not address the buffer.
    /// The buffer is unchanged on error.
    fn apply_range(&mut self, doc: DocumentHandle, range: &Range, text: &str) -> Result<()>;

    /// Persist the buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails; the buffer stays dirty.
    fn save(&mut self, doc: DocumentHandle) -> Result<()>;

    /// Undo the most recent undoable step. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if restoring persisted state fails.
    fn revert(&mut self, doc: DocumentHandle) -> Result<bool>;

    /// Open the document in the foreground.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown handle.
    fn reveal(&mut self, doc: DocumentHandle) -> Result<()>;

    /// Replace all annotations on the document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown handle.
    fn set_annotations(&mut self, doc: DocumentHandle, annotations: Vec<Annotation>)
        -> Result<()>;

    /// Remove all annotations from the document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown handle.
    fn clear_annotations(&mut self, doc: DocumentHandle) -> Result<()> {
        self.set_annotations(doc, Vec::new())
    }
}
