//! Unit tests for workspace path validation and atomic writes.

use std::fs;
use std::path::PathBuf;

use editlink::diff::validate_workspace_path;
use editlink::diff::writer::write_full_file;
use editlink::AppError;

fn roots() -> Vec<PathBuf> {
    vec![PathBuf::from("/ws/project"), PathBuf::from("/ws/other")]
}

#[test]
fn relative_paths_join_the_first_root() {
    let path = validate_workspace_path(&roots(), "src/a.py").unwrap();
    assert_eq!(path, PathBuf::from("/ws/project/src/a.py"));
}

#[test]
fn absolute_paths_in_any_root_are_accepted() {
    let path = validate_workspace_path(&roots(), "/ws/other/b.rs").unwrap();
    assert_eq!(path, PathBuf::from("/ws/other/b.rs"));
}

#[test]
fn dot_segments_are_normalized() {
    let path = validate_workspace_path(&roots(), "src/./lib/../a.py").unwrap();
    assert_eq!(path, PathBuf::from("/ws/project/src/a.py"));
}

#[test]
fn escaping_the_workspace_is_rejected() {
    for candidate in ["../secret", "/etc/passwd", "src/../../../etc"] {
        let err = validate_workspace_path(&roots(), candidate).unwrap_err();
        assert!(matches!(err, AppError::PathViolation(_)), "{candidate}");
    }
}

#[test]
fn no_roots_rejects_everything() {
    assert!(matches!(
        validate_workspace_path(&[], "a.py"),
        Err(AppError::PathViolation(_))
    ));
}

#[test]
fn write_full_file_creates_parent_directories() {
    let ws = tempfile::tempdir().expect("tempdir");
    let target = ws.path().join("deep/nested/file.rs");
    let summary = write_full_file(&target, "// nested\n").expect("write");
    assert_eq!(fs::read_to_string(&target).unwrap(), "// nested\n");
    assert_eq!(summary.bytes_written, 10);
}

#[test]
fn write_full_file_overwrites_existing_file() {
    let ws = tempfile::tempdir().expect("tempdir");
    let target = ws.path().join("existing.rs");
    fs::write(&target, "old content").unwrap();
    write_full_file(&target, "new content\n").expect("overwrite");
    assert_eq!(fs::read_to_string(&target).unwrap(), "new content\n");
}
