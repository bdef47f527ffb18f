//! Unit tests for the diff state store.

use std::path::{Path, PathBuf};

use editlink::models::{Edit, EditStatus, FileState, Proposal, Range};
use editlink::store::{DiffStore, Resolution};
use editlink::AppError;

fn proposal(file: &str, edits: usize) -> Proposal {
    let edits = (0..edits)
        .map(|i| {
            let line = u32::try_from(i).unwrap();
            Edit::new(Range::from_coords(line, 0, line, 0), "// ")
        })
        .collect();
    Proposal::new(PathBuf::from(file), edits, String::new(), "a\nb\nc\n".into(), None)
}

#[test]
fn one_proposal_per_file_last_writer_wins() {
    let mut store = DiffStore::new();
    let first = proposal("/ws/a.py", 1);
    let second = proposal("/ws/a.py", 2);
    let second_id = second.id.clone();

    assert!(store.put_proposal(first.clone()).is_none());
    let superseded = store.put_proposal(second).expect("first superseded");
    assert_eq!(superseded.id, first.id);

    assert_eq!(store.len(), 1);
    let stored = store.get(Path::new("/ws/a.py")).unwrap();
    assert_eq!(stored.id, second_id);
    assert_eq!(stored.edits.len(), 2);
}

#[test]
fn files_are_independent() {
    let mut store = DiffStore::new();
    store.put_proposal(proposal("/ws/b.py", 1));
    store.put_proposal(proposal("/ws/a.py", 1));
    let files: Vec<&Path> = store.iter().map(Proposal::file).collect();
    assert_eq!(files, vec![Path::new("/ws/a.py"), Path::new("/ws/b.py")]);
}

#[test]
fn absent_file_is_none() {
    let store = DiffStore::new();
    assert_eq!(store.state(Path::new("/ws/a.py")), FileState::None);
    assert!(store.get(Path::new("/ws/a.py")).is_none());
}

#[test]
fn resolving_last_edit_evicts() {
    let mut store = DiffStore::new();
    let file = Path::new("/ws/a.py");
    store.put_proposal(proposal("/ws/a.py", 2));

    let first = store.resolve_edit(file, 0, EditStatus::Accepted).unwrap();
    assert_eq!(first, Resolution::Pending { remaining: 1 });
    assert_eq!(store.state(file), FileState::Partial);

    match store.resolve_edit(file, 1, EditStatus::Rejected).unwrap() {
        Resolution::Evicted(p) => {
            assert_eq!(p.state(), FileState::Accepted);
            assert_eq!(p.accepted_indices(), vec![0]);
        }
        other => panic!("expected eviction, got {other:?}"),
    }
    assert_eq!(store.state(file), FileState::None);
    assert!(store.is_empty());
}

#[test]
fn resolving_twice_is_unchanged() {
    let mut store = DiffStore::new();
    let file = Path::new("/ws/a.py");
    store.put_proposal(proposal("/ws/a.py", 2));
    store.resolve_edit(file, 0, EditStatus::Accepted).unwrap();
    assert_eq!(
        store.resolve_edit(file, 0, EditStatus::Rejected).unwrap(),
        Resolution::Unchanged
    );
}

#[test]
fn resolve_all_evicts_with_outcome() {
    let mut store = DiffStore::new();
    let file = Path::new("/ws/a.py");
    store.put_proposal(proposal("/ws/a.py", 3));
    store.resolve_edit(file, 1, EditStatus::Accepted).unwrap();

    let done = store.resolve_all(file, EditStatus::Rejected).unwrap();
    assert_eq!(
        done.statuses,
        vec![EditStatus::Rejected, EditStatus::Accepted, EditStatus::Rejected]
    );
    assert!(store.get(file).is_none());
}

#[test]
fn missing_file_is_not_found() {
    let mut store = DiffStore::new();
    let file = Path::new("/ws/none.py");
    assert!(matches!(
        store.resolve_edit(file, 0, EditStatus::Accepted),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        store.resolve_all(file, EditStatus::Accepted),
        Err(AppError::NotFound(_))
    ));
}

#[test]
fn clear_evicts_regardless_of_state() {
    let mut store = DiffStore::new();
    store.put_proposal(proposal("/ws/a.py", 1));
    assert!(store.clear(Path::new("/ws/a.py")).is_some());
    assert!(store.clear(Path::new("/ws/a.py")).is_none());
}
