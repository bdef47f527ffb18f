//! Filesystem-backed editing surface.
//!
//! Keeps one in-memory buffer per opened file next to the last persisted
//! text. Every `apply_range` pushes one undo entry; `revert` pops it and, if
//! that entry had already been saved, rewrites the file so disk matches the
//! restored buffer. Re-opening a clean document picks up external writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::diff::text::LineIndex;
use crate::diff::writer::write_full_file;
use crate::models::Range;
use crate::surface::{Annotation, DocumentHandle, EditingSurface};
use crate::{AppError, Result};

#[derive(Debug, Clone)]
struct UndoEntry {
    before: String,
    persisted: bool,
}

#[derive(Debug, Clone)]
struct Document {
    path: PathBuf,
    buffer: String,
    persisted: String,
    undo: Vec<UndoEntry>,
    annotations: Vec<Annotation>,
}

/// Headless editing surface operating directly on files.
#[derive(Debug, Default)]
pub struct FileSurface {
    documents: HashMap<DocumentHandle, Document>,
    by_path: HashMap<PathBuf, DocumentHandle>,
    next_handle: u64,
    focused: Option<DocumentHandle>,
}

impl FileSurface {
    /// Create an empty surface with no open documents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of `file` if it is open.
    #[must_use]
    pub fn handle_for(&self, file: &Path) -> Option<DocumentHandle> {
        self.by_path.get(file).copied()
    }

    /// Document most recently revealed.
    #[must_use]
    pub fn focused(&self) -> Option<DocumentHandle> {
        self.focused
    }

    /// Path of the most recently revealed document.
    #[must_use]
    pub fn focused_path(&self) -> Option<&Path> {
        self.focused
            .and_then(|h| self.documents.get(&h))
            .map(|d| d.path.as_path())
    }

    /// Annotations currently shown on `file`.
    #[must_use]
    pub fn annotations(&self, file: &Path) -> &[Annotation] {
        self.handle_for(file)
            .and_then(|h| self.documents.get(&h))
            .map_or(&[], |d| d.annotations.as_slice())
    }

    /// Forget `file`, dropping its buffer and undo history.
    pub fn close(&mut self, file: &Path) {
        if let Some(handle) = self.by_path.remove(file) {
            self.documents.remove(&handle);
            if self.focused == Some(handle) {
                self.focused = None;
            }
        }
    }

    /// A clean buffer tracks external writes to its file. The undo history
    /// no longer describes the file afterwards and is dropped.
    fn follow_disk(&mut self, handle: DocumentHandle) -> Result<()> {
        let d = self.doc_mut(handle)?;
        if d.buffer != d.persisted {
            return Ok(());
        }
        let disk = read_persisted(&d.path)?;
        if disk != d.persisted {
            debug!(path = %d.path.display(), "document changed on disk; following");
            d.buffer.clone_from(&disk);
            d.persisted = disk;
            d.undo.clear();
        }
        Ok(())
    }

    fn doc(&self, handle: DocumentHandle) -> Result<&Document> {
        self.documents
            .get(&handle)
            .ok_or_else(|| AppError::NotFound(format!("unknown document {handle}")))
    }

    fn doc_mut(&mut self, handle: DocumentHandle) -> Result<&mut Document> {
        self.documents
            .get_mut(&handle)
            .ok_or_else(|| AppError::NotFound(format!("unknown document {handle}")))
    }
}

/// Read `path`, treating a missing file as empty.
fn read_persisted(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(AppError::Io(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

impl EditingSurface for FileSurface {
    fn open(&mut self, file: &Path) -> Result<DocumentHandle> {
        if let Some(handle) = self.by_path.get(file).copied() {
            self.follow_disk(handle)?;
            return Ok(handle);
        }
        let persisted = read_persisted(file)?;
        let handle = DocumentHandle(self.next_handle);
        self.next_handle += 1;
        self.documents.insert(
            handle,
            Document {
                path: file.to_path_buf(),
                buffer: persisted.clone(),
                persisted,
                undo: Vec::new(),
                annotations: Vec::new(),
            },
        );
        self.by_path.insert(file.to_path_buf(), handle);
        debug!(path = %file.display(), %handle, "document opened");
        Ok(handle)
    }

    fn text(&self, doc: DocumentHandle) -> Result<String> {
        Ok(self.doc(doc)?.buffer.clone())
    }

    fn persisted_text(&self, doc: DocumentHandle) -> Result<String> {
        Ok(self.doc(doc)?.persisted.clone())
    }

    fn is_dirty(&self, doc: DocumentHandle) -> Result<bool> {
        let d = self.doc(doc)?;
        Ok(d.buffer != d.persisted)
    }

    fn reload(&mut self, doc: DocumentHandle) -> Result<()> {
        let d = self.doc_mut(doc)?;
        let persisted = read_persisted(&d.path)?;
        d.buffer.clone_from(&persisted);
        d.persisted = persisted;
        d.undo.retain(|entry| entry.persisted);
        debug!(path = %d.path.display(), "document reloaded from disk");
        Ok(())
    }

    fn apply_range(&mut self, doc: DocumentHandle, range: &Range, text: &str) -> Result<()> {
        let d = self.doc_mut(doc)?;
        if !range.is_ordered() {
            return Err(AppError::OutOfBounds(format!(
                "range {range} has start after end"
            )));
        }
        let (start, end) = {
            let index = LineIndex::new(&d.buffer);
            (index.offset_of(range.start)?, index.offset_of(range.end)?)
        };
        let before = d.buffer.clone();
        d.buffer.replace_range(start..end, text);
        d.undo.push(UndoEntry {
            before,
            persisted: false,
        });
        Ok(())
    }

    fn save(&mut self, doc: DocumentHandle) -> Result<()> {
        let d = self.doc_mut(doc)?;
        write_full_file(&d.path, &d.buffer)?;
        d.persisted.clone_from(&d.buffer);
        for entry in &mut d.undo {
            entry.persisted = true;
        }
        Ok(())
    }

    fn revert(&mut self, doc: DocumentHandle) -> Result<bool> {
        let d = self.doc_mut(doc)?;
        let Some(entry) = d.undo.pop() else {
            return Ok(false);
        };
        if entry.persisted {
            if let Err(err) = write_full_file(&d.path, &entry.before) {
                d.undo.push(entry);
                return Err(err);
            }
            d.persisted.clone_from(&entry.before);
        }
        d.buffer = entry.before;
        debug!(path = %d.path.display(), "undo step reverted");
        Ok(true)
    }

    fn reveal(&mut self, doc: DocumentHandle) -> Result<()> {
        self.doc(doc)?;
        self.focused = Some(doc);
        Ok(())
    }

    fn set_annotations(
        &mut self,
        doc: DocumentHandle,
        annotations: Vec<Annotation>,
    ) -> Result<()> {
        self.doc_mut(doc)?.annotations = annotations;
        Ok(())
    }
}
