//! Unit tests for the filesystem-backed editing surface.

use std::fs;

use editlink::models::Range;
use editlink::surface::{Annotation, AnnotationKind, EditingSurface, FileSurface};

fn seeded(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let ws = tempfile::tempdir().expect("tempdir");
    let path = ws.path().join("doc.txt");
    fs::write(&path, content).expect("seed");
    (ws, path)
}

#[test]
fn open_is_idempotent() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let a = surface.open(&path).unwrap();
    let b = surface.open(&path).unwrap();
    assert_eq!(a, b);
    assert_eq!(surface.text(a).unwrap(), "one\n");
}

#[test]
fn missing_file_opens_empty() {
    let ws = tempfile::tempdir().unwrap();
    let mut surface = FileSurface::new();
    let doc = surface.open(&ws.path().join("new.txt")).unwrap();
    assert_eq!(surface.text(doc).unwrap(), "");
    assert!(!surface.is_dirty(doc).unwrap());
}

#[test]
fn edits_stay_in_buffer_until_saved() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let doc = surface.open(&path).unwrap();
    surface
        .apply_range(doc, &Range::from_coords(0, 0, 0, 3), "ONE")
        .unwrap();
    assert!(surface.is_dirty(doc).unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), "one\n");

    surface.save(doc).unwrap();
    assert!(!surface.is_dirty(doc).unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), "ONE\n");
    assert_eq!(surface.persisted_text(doc).unwrap(), "ONE\n");
}

#[test]
fn revert_of_saved_edit_restores_disk() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let doc = surface.open(&path).unwrap();
    surface
        .apply_range(doc, &Range::from_coords(0, 0, 0, 0), "zero\n")
        .unwrap();
    surface.save(doc).unwrap();

    assert!(surface.revert(doc).unwrap());
    assert_eq!(fs::read_to_string(&path).unwrap(), "one\n");
    assert_eq!(surface.text(doc).unwrap(), "one\n");
    assert!(!surface.revert(doc).unwrap());
}

#[test]
fn reload_discards_unsaved_changes() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let doc = surface.open(&path).unwrap();
    surface
        .apply_range(doc, &Range::from_coords(0, 0, 0, 3), "dirty")
        .unwrap();
    surface.reload(doc).unwrap();
    assert_eq!(surface.text(doc).unwrap(), "one\n");
    assert!(!surface.revert(doc).unwrap());
}

#[test]
fn clean_buffer_follows_external_writes() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let doc = surface.open(&path).unwrap();
    fs::write(&path, "changed elsewhere\n").unwrap();

    assert_eq!(surface.open(&path).unwrap(), doc);
    assert_eq!(surface.text(doc).unwrap(), "changed elsewhere\n");
    assert_eq!(surface.persisted_text(doc).unwrap(), "changed elsewhere\n");
}

#[test]
fn dirty_buffer_ignores_external_writes() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let doc = surface.open(&path).unwrap();
    surface
        .apply_range(doc, &Range::from_coords(0, 3, 0, 3), "!")
        .unwrap();
    fs::write(&path, "changed elsewhere\n").unwrap();

    surface.open(&path).unwrap();
    assert_eq!(surface.text(doc).unwrap(), "one!\n");
    assert_eq!(surface.persisted_text(doc).unwrap(), "one\n");
}

#[test]
fn annotations_replace_and_clear() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let doc = surface.open(&path).unwrap();
    let note = Annotation {
        line: 0,
        edit_index: 0,
        kind: AnnotationKind::Replace,
        hover: "edit 0".into(),
    };
    surface.set_annotations(doc, vec![note.clone()]).unwrap();
    assert_eq!(surface.annotations(&path), &[note]);
    surface.clear_annotations(doc).unwrap();
    assert!(surface.annotations(&path).is_empty());
}

#[test]
fn reveal_sets_focus() {
    let (_ws, path) = seeded("one\n");
    let mut surface = FileSurface::new();
    let doc = surface.open(&path).unwrap();
    assert!(surface.focused().is_none());
    surface.reveal(doc).unwrap();
    assert_eq!(surface.focused_path(), Some(path.as_path()));
    surface.close(&path);
    assert!(surface.focused().is_none());
    assert!(surface.handle_for(&path).is_none());
}
