// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn item(content: &str, status: TodoStatus, now: u64) -> TodoItem {
    TodoItem::new(content.to_owned(), status, now)
}

#[test]
fn normalize_folds_whitespace() {
    assert_eq!(normalize("  fix   the\tparser  "), Some("fix the parser".to_owned()));
}

#[test]
fn normalize_rejects_short_content() {
    assert_eq!(normalize("abc"), None);
    assert_eq!(normalize("  a b  "), None);
}

#[test]
fn content_hash_is_stable() {
    assert_eq!(content_hash("fix the parser"), content_hash("fix the parser"));
    assert_ne!(content_hash("fix the parser"), content_hash("fix the lexer"));
}

#[test]
fn upsert_inserts_new_items() {
    let mut store = TodoStore::default();
    assert!(store.upsert(item("implement feature A", TodoStatus::Pending, 1)));
    assert!(store.upsert(item("implement feature B", TodoStatus::Pending, 2)));
    assert_eq!(store.len(), 2);
}

#[test]
fn near_duplicates_are_merged() {
    let mut store = TodoStore::default();
    store.upsert(item("implement the streaming parser for terminal output", TodoStatus::Pending, 1));
    store.upsert(item(
        "implement the streaming parser for terminal outputs",
        TodoStatus::InProgress,
        2,
    ));
    assert_eq!(store.len(), 1);
    let items = store.items();
    assert_eq!(items[0].status, TodoStatus::InProgress);
    // Longer content won the merge.
    assert_eq!(items[0].content, "implement the streaming parser for terminal outputs");
    assert_eq!(items[0].detected_at_ms, 2);
}

#[test]
fn short_items_need_near_exact_match() {
    let mut store = TodoStore::default();
    store.upsert(item("fix the bug", TodoStatus::Pending, 1));
    store.upsert(item("fix the docs", TodoStatus::Pending, 2));
    assert_eq!(store.len(), 2);
}

#[test]
fn merge_is_reflexive() {
    let a = item("implement the parser module", TodoStatus::InProgress, 5);
    assert_eq!(merge(&a, &a), a);
}

#[test]
fn merge_is_symmetric() {
    let mut a = item("implement the parser", TodoStatus::Pending, 1);
    a.priority = Some(Priority::P2);
    a.complexity = Some(Complexity::Simple);
    a.estimated_minutes = Some(15);
    let mut b = item("implement the parser module", TodoStatus::Completed, 2);
    b.priority = Some(Priority::P0);
    b.complexity = Some(Complexity::Moderate);
    b.estimated_minutes = Some(45);

    // Full-struct equality: every field must resolve order-independently.
    assert_eq!(merge(&a, &b), merge(&b, &a));
}

#[test]
fn merge_is_symmetric_when_only_one_side_has_annotations() {
    let mut a = item("wire the event fanout", TodoStatus::InProgress, 3);
    a.priority = Some(Priority::P1);
    let b = item("wire the event fanout batching", TodoStatus::Pending, 4);

    let ab = merge(&a, &b);
    assert_eq!(ab, merge(&b, &a));
    // The loser's annotations survive when the winner has none.
    assert_eq!(ab.priority, Some(Priority::P1));
}

#[test]
fn merged_id_tracks_the_winning_content() {
    let a = item("implement the streaming parser for terminal output", TodoStatus::Pending, 1);
    let b = item("implement the streaming parser for terminal outputs", TodoStatus::Pending, 2);
    let merged = merge(&a, &b);
    assert_eq!(merged.content, "implement the streaming parser for terminal outputs");
    assert_eq!(merged.id, content_hash(&merged.content));

    // The store re-keys so lookups by the new id keep working.
    let mut store = TodoStore::default();
    store.upsert(a);
    store.upsert(b);
    assert_eq!(store.len(), 1);
    assert!(store.get(merged.id).is_some());
}

#[test]
fn completed_is_never_demoted() {
    let mut store = TodoStore::default();
    let done = item("ship the release notes", TodoStatus::Completed, 1);
    let id = done.id;
    store.upsert(done);
    store.upsert(item("ship the release notes", TodoStatus::Pending, 2));
    assert_eq!(store.get(id).map(|t| t.status), Some(TodoStatus::Completed));
}

#[test]
fn set_status_only_promotes() {
    let mut store = TodoStore::default();
    let t = item("write integration tests", TodoStatus::InProgress, 1);
    let id = t.id;
    store.upsert(t);
    assert!(!store.set_status(id, TodoStatus::Pending, 2));
    assert!(store.set_status(id, TodoStatus::Completed, 3));
    assert_eq!(store.get(id).map(|t| t.status), Some(TodoStatus::Completed));
}

#[test]
fn eviction_drops_oldest_by_detection() {
    let mut store = TodoStore::new(2);
    store.upsert(item("todo alpha one", TodoStatus::Pending, 10));
    store.upsert(item("todo bravo two", TodoStatus::Pending, 20));
    store.upsert(item("todo charlie three", TodoStatus::Pending, 30));
    assert_eq!(store.len(), 2);
    let contents: Vec<String> = store.items().into_iter().map(|t| t.content).collect();
    assert!(!contents.contains(&"todo alpha one".to_owned()));
}

#[test]
fn expiry_sweeps_stale_items() {
    let mut store = TodoStore::default();
    store.upsert(item("stale item here", TodoStatus::Pending, 0));
    store.upsert(item("fresh item here", TodoStatus::Pending, TODO_EXPIRY_MS));
    assert!(store.expire(TODO_EXPIRY_MS + 1));
    assert_eq!(store.len(), 1);
    assert_eq!(store.items()[0].content, "fresh item here");
}

#[test]
fn next_open_skips_completed() {
    let mut store = TodoStore::default();
    store.upsert(item("finished task here", TodoStatus::Completed, 1));
    store.upsert(item("pending task here", TodoStatus::Pending, 2));
    assert_eq!(store.next_open().map(|t| t.content.as_str()), Some("pending task here"));
    assert_eq!(store.open_count(), 1);
}
