//! Unit tests for deriving edits from whole before/after texts.

use editlink::diff::line_diff::edits_from_texts;
use editlink::diff::splice::splice_edits;
use editlink::models::Range;

fn check(before: &str, after: &str) -> usize {
    let edits = edits_from_texts(before, after).unwrap();
    assert_eq!(splice_edits(before, &edits).unwrap(), after);
    edits.len()
}

#[test]
fn identical_texts_yield_no_edits() {
    assert!(edits_from_texts("same\n", "same\n").unwrap().is_empty());
}

#[test]
fn single_line_change_is_one_edit() {
    let before = "a\nb\nc\n";
    let edits = edits_from_texts(before, "a\nB\nc\n").unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].range, Range::from_coords(1, 0, 2, 0));
    assert_eq!(edits[0].old_text.as_deref(), Some("b\n"));
    assert_eq!(edits[0].new_text, "B\n");
}

#[test]
fn separate_hunks_become_separate_edits() {
    assert_eq!(check("1\n2\n3\n4\n5\n", "one\n2\n3\n4\nfive\n"), 2);
}

#[test]
fn pure_insertions_and_deletions() {
    assert_eq!(check("a\nc\n", "a\nb\nc\n"), 1);
    assert_eq!(check("a\nb\nc\n", "a\nc\n"), 1);
    check("", "new file\n");
    check("gone\n", "");
}

#[test]
fn insertion_after_earlier_deletion_lands_correctly() {
    check("x\na\nb\nc\n", "a\nb\nNEW\nc\n");
    check("a\nb\nc\n", "z\na\nc\nd\n");
}

#[test]
fn missing_trailing_newline_is_preserved() {
    check("a\nb", "a\nb\nc");
    check("a\nb\n", "a\nb");
}
