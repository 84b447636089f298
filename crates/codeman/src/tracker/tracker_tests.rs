// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn enabled_tracker() -> RalphTracker {
    let Ok(mut tracker) = RalphTracker::new() else { unreachable!("pattern compile") };
    tracker.set_enabled(true);
    tracker
}

fn completions(events: &[TrackerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TrackerEvent::CompletionDetected { phrase } => Some(phrase.clone()),
            _ => None,
        })
        .collect()
}

fn feed_all(tracker: &mut RalphTracker, chunks: &[&str]) -> Vec<TrackerEvent> {
    let mut events = Vec::new();
    let mut now = 1_000;
    for chunk in chunks {
        events.extend(tracker.feed(chunk, now));
        now += 100;
    }
    events.extend(tracker.flush_pending_events());
    events
}

// Prompt echo does not false-complete: the first tagged occurrence only
// registers the phrase; the second signals exactly once.
#[test]
fn prompt_echo_does_not_false_complete() {
    let mut tracker = enabled_tracker();

    let events = tracker
        .feed("When done, output exactly: <promise>ALL_TASKS_COMPLETE</promise>\n", 1_000);
    assert!(completions(&events).is_empty());
    assert_eq!(
        tracker.loop_state().completion_phrase.as_deref(),
        Some("ALL_TASKS_COMPLETE")
    );

    let events = tracker.feed("<promise>ALL_TASKS_COMPLETE</promise>\n", 2_000);
    assert_eq!(completions(&events), vec!["ALL_TASKS_COMPLETE".to_owned()]);

    // Never twice for the same phrase.
    let events = tracker.feed("<promise>ALL_TASKS_COMPLETE</promise>\n", 3_000);
    assert!(completions(&events).is_empty());
}

// A promise tag split across chunk boundaries still completes exactly once.
#[test]
fn cross_chunk_promise_tag_completes() {
    let mut tracker = enabled_tracker();
    tracker.configure(Some("CROSS_CHUNK".to_owned()), None);
    tracker.set_loop_active(true);

    let events = tracker.feed("text <promise>CROSS_", 1_000);
    assert!(completions(&events).is_empty());

    let events = tracker.feed("CHUNK</promise> more\n", 1_100);
    assert_eq!(completions(&events), vec!["CROSS_CHUNK".to_owned()]);
}

#[test]
fn auto_enables_on_first_ralph_pattern() {
    let Ok(mut tracker) = RalphTracker::new() else { unreachable!("pattern compile") };
    assert!(!tracker.is_enabled());

    let events = tracker.feed("plain build output\n", 1_000);
    assert!(events.is_empty());
    assert!(!tracker.is_enabled());

    let events = tracker.feed("Ralph iteration 1 of 20\n", 2_000);
    assert!(events.contains(&TrackerEvent::Enabled));
    assert!(tracker.is_enabled());
    assert_eq!(tracker.loop_state().cycles, 1);
    assert_eq!(tracker.loop_state().max_iterations, Some(20));
    assert!(tracker.loop_state().active);
}

#[test]
fn auto_enable_can_be_disallowed() {
    let Ok(mut tracker) = RalphTracker::new() else { unreachable!("pattern compile") };
    tracker.set_auto_enable(false);
    let events = tracker.feed("Ralph iteration 1 of 20\n", 1_000);
    assert!(events.is_empty());
    assert!(!tracker.is_enabled());
}

#[test]
fn bare_phrase_in_prompt_context_is_ignored() {
    let mut tracker = enabled_tracker();
    tracker.feed("<promise>FINISH_MARKER</promise>\n", 1_000);

    // Prompt-context lines never count as bare completions.
    let events = tracker.feed("your completion phrase is FINISH_MARKER\n", 2_000);
    assert!(completions(&events).is_empty());
    let events = tracker.feed("output: FINISH_MARKER\n", 3_000);
    assert!(completions(&events).is_empty());

    // A clean line does.
    let events = tracker.feed("FINISH_MARKER\n", 4_000);
    assert_eq!(completions(&events), vec!["FINISH_MARKER".to_owned()]);
}

#[test]
fn completion_marks_all_todos_and_deactivates() {
    let mut tracker = enabled_tracker();
    tracker.set_loop_active(true);
    let events = feed_all(
        &mut tracker,
        &["- [ ] first tracked task\n", "- [ ] second tracked task\n"],
    );
    assert!(events.iter().any(|e| matches!(e, TrackerEvent::TodoUpdate(_))));

    let mut events = tracker.feed("<promise>WRAP_IT_UP</promise>\n", 10_000);
    events.extend(tracker.flush_pending_events());
    assert_eq!(completions(&events), vec!["WRAP_IT_UP".to_owned()]);
    let todos = events.iter().rev().find_map(|e| match e {
        TrackerEvent::TodoUpdate(todos) => Some(todos.clone()),
        _ => None,
    });
    let Some(todos) = todos else { unreachable!("todo update after completion") };
    assert!(todos.iter().all(|t| t.status == todo::TodoStatus::Completed));
    assert!(!tracker.loop_state().active);
    assert!((tracker.loop_state().last_confidence - 1.0).abs() < f64::EPSILON);
}

// All-tasks-complete announcement with a mismatched count is ignored.
#[test]
fn mismatched_announcement_count_is_ignored() {
    let mut tracker = enabled_tracker();
    feed_all(&mut tracker, &["- [ ] first tracked task\n", "- [ ] second tracked task\n"]);

    tracker.feed("All 15 files have been created\n", 5_000);
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.todos.len(), 2);
    assert!(snapshot.todos.iter().all(|t| t.status == todo::TodoStatus::Pending));
}

#[test]
fn matching_announcement_count_completes() {
    let mut tracker = enabled_tracker();
    feed_all(&mut tracker, &["- [ ] first tracked task\n", "- [ ] second tracked task\n"]);

    tracker.feed("All 3 tasks have been completed\n", 5_000);
    let snapshot = tracker.snapshot();
    assert!(snapshot.todos.iter().all(|t| t.status == todo::TodoStatus::Completed));
}

#[test]
fn announcement_needs_tracked_todos() {
    let mut tracker = enabled_tracker();
    let events = tracker.feed("All tasks are complete\n", 1_000);
    assert!(!events.iter().any(|e| matches!(e, TrackerEvent::TodoUpdate(_))));
    // The sentence still counts as an exit-gate indicator.
    assert!(events.iter().any(|e| matches!(e, TrackerEvent::CompletionIndicator { .. })));
}

#[test]
fn status_blocks_flow_through() {
    let mut tracker = enabled_tracker();
    let events = feed_all(
        &mut tracker,
        &[
            "---RALPH_STATUS---\n",
            "STATUS: IN_PROGRESS\n",
            "TASKS_COMPLETED_THIS_LOOP: 2\n",
            "FILES_MODIFIED: 3\n",
            "---END_RALPH_STATUS---\n",
        ],
    );
    let block = events.iter().find_map(|e| match e {
        TrackerEvent::StatusBlockDetected(b) => Some(b.clone()),
        _ => None,
    });
    let Some(block) = block else { unreachable!("status block event") };
    assert_eq!(block.tasks_completed, Some(2));
    assert_eq!(tracker.snapshot().cumulative.files_modified, 3);
}

#[test]
fn todo_lines_inside_status_blocks_are_not_todos() {
    let mut tracker = enabled_tracker();
    feed_all(
        &mut tracker,
        &[
            "---RALPH_STATUS---\n",
            "STATUS: IN_PROGRESS\n",
            "RECOMMENDATION: - [ ] looks like a todo\n",
            "---END_RALPH_STATUS---\n",
        ],
    );
    assert!(tracker.snapshot().todos.is_empty());
}

#[test]
fn tool_and_narrator_lines_are_not_todos() {
    let mut tracker = enabled_tracker();
    feed_all(
        &mut tracker,
        &[
            "Bash(cargo test --workspace)\n",
            "I'll refactor the session loop first\n",
            "Let me check the fanout code\n",
        ],
    );
    assert!(tracker.snapshot().todos.is_empty());
}

#[test]
fn five_todo_syntaxes_are_recognized() {
    let mut tracker = enabled_tracker();
    feed_all(
        &mut tracker,
        &[
            "- [ ] checkbox style entry\n",
            "\u{2610} indicator icon entry\n",
            "rework the config loader (in progress)\n",
            "\u{25cb} native icon entry\n",
            "\u{2713} checkmark style entry\n",
        ],
    );
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.todos.len(), 5);
    let completed = snapshot
        .todos
        .iter()
        .filter(|t| t.status == todo::TodoStatus::Completed)
        .count();
    assert_eq!(completed, 1);
    let in_progress = snapshot
        .todos
        .iter()
        .filter(|t| t.status == todo::TodoStatus::InProgress)
        .count();
    assert_eq!(in_progress, 1);
}

#[test]
fn numbered_task_updates_look_up_content() {
    let mut tracker = enabled_tracker();
    feed_all(&mut tracker, &["Task #7 created: wire the event fanout\n"]);
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.todos.len(), 1);
    assert_eq!(snapshot.todos[0].status, todo::TodoStatus::Pending);

    feed_all(&mut tracker, &["Task #7 updated: status \u{2192} completed\n"]);
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.todos[0].status, todo::TodoStatus::Completed);
}

#[test]
fn todo_annotations_are_parsed() {
    let mut tracker = enabled_tracker();
    feed_all(&mut tracker, &["- [ ] P1 migrate the storage layer (complex) ~2h\n"]);
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.todos.len(), 1);
    let todo = &snapshot.todos[0];
    assert_eq!(todo.priority, Some(todo::Priority::P1));
    assert_eq!(todo.complexity, Some(todo::Complexity::Complex));
    assert_eq!(todo.estimated_minutes, Some(120));
}

#[test]
fn weak_phrase_triggers_validation_warning() {
    let mut tracker = enabled_tracker();
    let events = tracker.feed("<promise>DONE</promise>\n", 1_000);
    let warning = events.iter().find_map(|e| match e {
        TrackerEvent::PhraseValidationWarning { phrase, suggestion } => {
            Some((phrase.clone(), suggestion.clone()))
        }
        _ => None,
    });
    assert_eq!(warning, Some(("DONE".to_owned(), "DONE_TASKS_COMPLETE".to_owned())));
}

#[test]
fn partial_promise_tag_is_bounded() {
    let mut tracker = enabled_tracker();
    tracker.configure(Some("NEVER_CLOSED".to_owned()), None);
    tracker.set_loop_active(true);

    tracker.feed("junk <promise>NEVER_CLOSED", 1_000);
    // The closer never arrives within the budget; the buffered tag is
    // discarded rather than growing without bound.
    let filler = "x".repeat(600);
    tracker.feed(&filler, 1_100);
    let events = tracker.feed("</promise>\n", 1_200);
    assert!(completions(&events).is_empty());
}

#[test]
fn stall_warning_fires_once_per_quiet_period() {
    let mut tracker = enabled_tracker();
    tracker.set_loop_active(true);
    tracker.feed("Iteration 1\n", 1_000);

    let events = tracker.poll(1_000 + STALL_AFTER_MS);
    assert!(events.iter().any(|e| matches!(e, TrackerEvent::StallWarning { .. })));
    let events = tracker.poll(2_000 + STALL_AFTER_MS);
    assert!(!events.iter().any(|e| matches!(e, TrackerEvent::StallWarning { .. })));

    // New output resets the stall latch.
    tracker.feed("more output\n", 3_000 + STALL_AFTER_MS);
    let events = tracker.poll(3_000 + 2 * STALL_AFTER_MS);
    assert!(events.iter().any(|e| matches!(e, TrackerEvent::StallWarning { .. })));
}

#[test]
fn debounced_updates_are_flushed_on_demand() {
    let mut tracker = enabled_tracker();
    // Two rapid chunks inside the debounce window: the second todo change
    // is pending until flushed.
    tracker.feed("- [ ] first tracked task\n", 1_000);
    let events = tracker.feed("- [ ] second tracked task\n", 1_010);
    assert!(!events.iter().any(|e| matches!(e, TrackerEvent::TodoUpdate(_))));

    let events = tracker.flush_pending_events();
    let todos = events.iter().find_map(|e| match e {
        TrackerEvent::TodoUpdate(todos) => Some(todos.len()),
        _ => None,
    });
    assert_eq!(todos, Some(2));
}

#[test]
fn plan_file_suppresses_output_detection() {
    let mut tracker = enabled_tracker();
    let plan = vec![todo::TodoItem::new(
        "authoritative plan entry".to_owned(),
        todo::TodoStatus::Pending,
        1_000,
    )];
    tracker.set_plan_todos(Some(plan));

    feed_all(&mut tracker, &["- [ ] output detected entry\n"]);
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.todos.len(), 1);
    assert_eq!(snapshot.todos[0].content, "authoritative plan entry");

    // Plan file removed: output detection resumes.
    tracker.set_plan_todos(None);
    feed_all(&mut tracker, &["- [ ] output detected entry\n"]);
    assert_eq!(tracker.snapshot().todos.len(), 2);
}

// Universal property 1: chunking must not change the emitted events
// (up to debounced coalescing, which flush_pending_events removes).
#[test]
fn chunk_split_invariance() {
    let input = "Ralph iteration 1 of 9\n- [ ] build the parser core\nBash(cargo check)\n\
                 ---RALPH_STATUS---\nSTATUS: IN_PROGRESS\nTASKS_COMPLETED_THIS_LOOP: 1\n\
                 FILES_MODIFIED: 2\n---END_RALPH_STATUS---\n<promise>SPLIT_TEST</promise>\n\
                 \u{2713} build the parser core\n<promise>SPLIT_TEST</promise>\n";

    let whole = {
        let mut tracker = enabled_tracker();
        let mut events = tracker.feed(input, 1_000);
        events.extend(tracker.flush_pending_events());
        events
    };

    for split in [1usize, 3, 7, 16, 41] {
        let mut tracker = enabled_tracker();
        let mut events = Vec::new();
        let bytes = input.as_bytes();
        let mut start = 0;
        while start < bytes.len() {
            let end = (start + split).min(bytes.len());
            // Splits land on char boundaries in this ASCII-safe fixture
            // except inside the unicode checkmark; snap to a boundary.
            let mut end = end;
            while !input.is_char_boundary(end) {
                end += 1;
            }
            events.extend(tracker.feed(&input[start..end], 1_000));
            start = end;
        }
        events.extend(tracker.flush_pending_events());

        assert_eq!(
            completions(&events),
            completions(&whole),
            "completions diverged at split {split}"
        );
        let count = |evs: &[TrackerEvent]| {
            evs.iter()
                .filter(|e| matches!(e, TrackerEvent::StatusBlockDetected(_)))
                .count()
        };
        assert_eq!(count(&events), count(&whole), "status blocks diverged at split {split}");
    }
}

proptest::proptest! {
    // Random chunking of a mixed transcript produces the same completion
    // and status-block events as a single feed.
    #[test]
    fn chunking_never_changes_semantics(splits in proptest::collection::vec(1usize..64, 0..12)) {
        let input = "Iteration 2 of 5\n- [ ] keep the loop moving\n\
                     <promise>PROP_PHRASE</promise>\nmid text\n\
                     <promise>PROP_PHRASE</promise>\nAll 1 tasks are done\n";

        let whole = {
            let mut tracker = enabled_tracker();
            let mut events = tracker.feed(input, 1_000);
            events.extend(tracker.flush_pending_events());
            events
        };

        let mut tracker = enabled_tracker();
        let mut events = Vec::new();
        let mut rest = input;
        for split in splits {
            if rest.is_empty() {
                break;
            }
            let mut cut = split.min(rest.len());
            while !rest.is_char_boundary(cut) {
                cut += 1;
            }
            let (chunk, tail) = rest.split_at(cut);
            events.extend(tracker.feed(chunk, 1_000));
            rest = tail;
        }
        if !rest.is_empty() {
            events.extend(tracker.feed(rest, 1_000));
        }
        events.extend(tracker.flush_pending_events());

        proptest::prop_assert_eq!(completions(&events), completions(&whole));
    }
}
