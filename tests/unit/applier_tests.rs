//! Unit tests for atomic edit application, staleness, and revert.

use std::fs;
use std::path::{Path, PathBuf};

use editlink::diff::EditApplier;
use editlink::models::{Edit, Range};
use editlink::surface::{Annotation, DocumentHandle, EditingSurface, FileSurface};
use editlink::{AppError, Result};

const SOURCE: &str = "def f(a, b):\n    x = 1\n    return a * b\n";

fn seeded() -> (tempfile::TempDir, PathBuf) {
    let ws = tempfile::tempdir().expect("tempdir");
    let path = ws.path().join("a.py");
    fs::write(&path, SOURCE).expect("seed");
    (ws, path)
}

fn three_edits() -> Vec<Edit> {
    vec![
        Edit::new(Range::from_coords(0, 4, 0, 5), "g"),
        Edit::new(Range::from_coords(1, 8, 1, 9), "2"),
        Edit::new(Range::from_coords(2, 11, 2, 16), "a + b"),
    ]
}

/// File surface whose writes can be made to fail.
#[derive(Default)]
struct FlakySurface {
    inner: FileSurface,
    fail_save: bool,
    garble: bool,
}

impl EditingSurface for FlakySurface {
    fn open(&mut self, file: &Path) -> Result<DocumentHandle> {
        self.inner.open(file)
    }
    fn text(&self, doc: DocumentHandle) -> Result<String> {
        self.inner.text(doc)
    }
    fn persisted_text(&self, doc: DocumentHandle) -> Result<String> {
        self.inner.persisted_text(doc)
    }
    fn is_dirty(&self, doc: DocumentHandle) -> Result<bool> {
        self.inner.is_dirty(doc)
    }
    fn reload(&mut self, doc: DocumentHandle) -> Result<()> {
        self.inner.reload(doc)
    }
    fn apply_range(&mut self, doc: DocumentHandle, range: &Range, text: &str) -> Result<()> {
        if self.garble {
            return self.inner.apply_range(doc, range, "garbage");
        }
        self.inner.apply_range(doc, range, text)
    }
    fn save(&mut self, doc: DocumentHandle) -> Result<()> {
        if self.fail_save {
            return Err(AppError::Io("disk full".into()));
        }
        self.inner.save(doc)
    }
    fn revert(&mut self, doc: DocumentHandle) -> Result<bool> {
        self.inner.revert(doc)
    }
    fn reveal(&mut self, doc: DocumentHandle) -> Result<()> {
        self.inner.reveal(doc)
    }
    fn set_annotations(&mut self, doc: DocumentHandle, annotations: Vec<Annotation>) -> Result<()> {
        self.inner.set_annotations(doc, annotations)
    }
}

#[test]
fn applies_all_edits_and_persists() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();

    let report = applier.apply(&path, &three_edits(), &base).unwrap();
    assert_eq!(report.edits_applied, 3);
    assert!(!report.reloaded);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "def g(a, b):\n    x = 2\n    return a + b\n"
    );
    assert_eq!(applier.surface().focused_path(), Some(path.as_path()));
}

#[test]
fn revert_is_byte_identical() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();
    applier.apply(&path, &three_edits(), &base).unwrap();

    assert!(applier.revert(&path).unwrap());
    assert_eq!(fs::read(&path).unwrap(), SOURCE.as_bytes());
}

#[test]
fn invalid_last_edit_leaves_document_untouched() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();
    let mut edits = three_edits();
    edits[2] = Edit::new(Range::from_coords(2, 11, 2, 99), "a + b");

    let err = applier.apply(&path, &edits, &base).unwrap_err();
    assert!(matches!(err, AppError::OutOfBounds(_)));
    assert_eq!(fs::read_to_string(&path).unwrap(), SOURCE);
    assert!(!applier.has_unsaved(&path).unwrap());
}

#[test]
fn overlapping_edits_are_rejected_before_touching_the_document() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();
    let edits = vec![
        Edit::new(Range::from_coords(2, 4, 2, 12), "x"),
        Edit::new(Range::from_coords(2, 11, 2, 16), "y"),
    ];
    assert!(matches!(
        applier.apply(&path, &edits, &base),
        Err(AppError::Overlap(_))
    ));
    assert_eq!(fs::read_to_string(&path).unwrap(), SOURCE);
}

#[test]
fn failed_save_rolls_back_the_buffer() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FlakySurface {
        fail_save: true,
        ..FlakySurface::default()
    });
    let base = applier.snapshot(&path).unwrap();

    let err = applier.apply(&path, &three_edits(), &base).unwrap_err();
    assert!(matches!(err, AppError::Io(_)));
    let doc = applier.surface_mut().open(&path).unwrap();
    assert_eq!(applier.surface().text(doc).unwrap(), SOURCE);
    assert_eq!(fs::read_to_string(&path).unwrap(), SOURCE);
}

#[test]
fn unexpected_surface_result_rolls_back() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FlakySurface {
        garble: true,
        ..FlakySurface::default()
    });
    let base = applier.snapshot(&path).unwrap();

    let err = applier.apply(&path, &three_edits(), &base).unwrap_err();
    assert!(matches!(err, AppError::Apply(_)));
    assert!(!applier.has_unsaved(&path).unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), SOURCE);
}

#[test]
fn unsaved_changes_are_reloaded_before_applying() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();
    let doc = applier.surface_mut().open(&path).unwrap();
    applier
        .surface_mut()
        .apply_range(doc, &Range::from_coords(0, 0, 0, 0), "# scratch\n")
        .unwrap();

    let report = applier.apply(&path, &three_edits(), &base).unwrap();
    assert!(report.reloaded);
    assert!(!fs::read_to_string(&path).unwrap().contains("scratch"));
}

#[test]
fn changed_file_is_stale() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();
    fs::write(&path, "def f(a, b):\n    return 0\n").unwrap();

    let err = applier.apply(&path, &three_edits(), &base).unwrap_err();
    assert!(matches!(err, AppError::StaleDocument(_)));
    assert_eq!(fs::read_to_string(&path).unwrap(), "def f(a, b):\n    return 0\n");
}

#[test]
fn preview_stays_unsaved_and_reverts() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();

    applier.preview(&path, &three_edits(), &base).unwrap();
    assert!(applier.has_unsaved(&path).unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), SOURCE);

    assert!(applier.revert(&path).unwrap());
    assert!(!applier.has_unsaved(&path).unwrap());
}

#[test]
fn apply_over_preview_discards_it() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();
    applier.preview(&path, &three_edits(), &base).unwrap();

    let only_last = vec![three_edits().remove(2)];
    let report = applier.apply(&path, &only_last, &base).unwrap();
    assert!(report.reloaded);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "def f(a, b):\n    x = 1\n    return a + b\n"
    );
}

#[cfg(unix)]
#[test]
fn apply_and_revert_keep_the_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let ws = tempfile::tempdir().expect("tempdir");
    let path = ws.path().join("run.sh");
    fs::write(&path, "echo a\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    let mut applier = EditApplier::new(FileSurface::new());
    let base = applier.snapshot(&path).unwrap();
    let edits = vec![Edit::new(Range::from_coords(0, 5, 0, 6), "b")];
    applier.apply(&path, &edits, &base).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "echo b\n");
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);

    assert!(applier.revert(&path).unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), "echo a\n");
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
}

#[test]
fn empty_edit_list_does_not_touch_the_document() {
    let (_ws, path) = seeded();
    let mut applier = EditApplier::new(FlakySurface {
        fail_save: true,
        ..FlakySurface::default()
    });
    let base = applier.snapshot(&path).unwrap();
    let earlier = vec![Edit::new(Range::from_coords(0, 4, 0, 5), "g")];
    applier.surface_mut().fail_save = false;
    applier.apply(&path, &earlier, &base).unwrap();
    let applied = fs::read_to_string(&path).unwrap();

    applier.surface_mut().fail_save = true;
    let report = applier.apply(&path, &[], &applied).unwrap();
    assert_eq!(report.edits_applied, 0);
    assert!(!report.reloaded);
    assert_eq!(fs::read_to_string(&path).unwrap(), applied);
    let doc = applier.surface_mut().open(&path).unwrap();
    assert_eq!(applier.surface().text(doc).unwrap(), applied);
}
