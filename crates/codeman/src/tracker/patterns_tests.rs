// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn patterns() -> Patterns {
    match Patterns::compile() {
        Ok(p) => p,
        Err(e) => unreachable!("pattern battery must compile: {e}"),
    }
}

#[test]
fn promise_tag_captures_phrase() {
    let p = patterns();
    let caps = p.promise_tag.captures("done <promise>ALL_TASKS_COMPLETE</promise> trailing");
    assert_eq!(caps.and_then(|c| c.get(1)).map(|m| m.as_str()), Some("ALL_TASKS_COMPLETE"));
}

#[yare::parameterized(
    plain = { "Iteration 5", Some((5, None)) },
    hash = { "iteration #12", Some((12, None)) },
    of_cap = { "Loop 3 of 20", Some((3, Some(20))) },
    slash_cap = { "cycle 7/10", Some((7, Some(10))) },
    unrelated = { "nothing here", None },
)]
fn iteration_parsing(line: &str, expected: Option<(u32, Option<u32>)>) {
    let p = patterns();
    let got = p.iteration.captures(line).map(|c| {
        let n = c.get(1).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
        let max = c.get(2).and_then(|m| m.as_str().parse().ok());
        (n, max)
    });
    assert_eq!(got, expected);
}

#[yare::parameterized(
    pending = { "- [ ] write the parser", " ", "write the parser" },
    done = { "- [x] write the parser", "x", "write the parser" },
    in_progress = { "  * [~] write the parser", "~", "write the parser" },
    bare = { "[ ] no bullet marker", " ", "no bullet marker" },
)]
fn checkbox_parsing(line: &str, mark: &str, content: &str) {
    let p = patterns();
    let caps = p.checkbox.captures(line);
    let Some(caps) = caps else { unreachable!("expected a checkbox match: {line}") };
    assert_eq!(caps.get(1).map(|m| m.as_str()), Some(mark));
    assert_eq!(caps.get(2).map(|m| m.as_str()), Some(content));
}

#[test]
fn paren_status_parsing() {
    let p = patterns();
    let caps = p.paren_status.captures("- migrate the config loader (in progress)");
    let Some(caps) = caps else { unreachable!("expected a paren-status match") };
    assert_eq!(caps.get(1).map(|m| m.as_str()), Some("migrate the config loader"));
    assert_eq!(caps.get(2).map(|m| m.as_str()), Some("in progress"));
}

#[test]
fn task_lifecycle_lines() {
    let p = patterns();
    let caps = p.task_created.captures("Task #3 created: wire the event fanout");
    let Some(caps) = caps else { unreachable!("expected task-created match") };
    assert_eq!(caps.get(1).map(|m| m.as_str()), Some("3"));
    assert_eq!(caps.get(2).map(|m| m.as_str()), Some("wire the event fanout"));

    let caps = p.task_updated.captures("Task #3 updated: status \u{2192} completed");
    let Some(caps) = caps else { unreachable!("expected task-updated match") };
    assert_eq!(caps.get(1).map(|m| m.as_str()), Some("3"));
    assert_eq!(caps.get(2).map(|m| m.as_str().trim()), Some("completed"));
}

#[test]
fn all_complete_extracts_count() {
    let p = patterns();
    let caps = p.all_complete.captures("All 15 files have been created");
    assert_eq!(
        caps.and_then(|c| c.get(1)).and_then(|m| m.as_str().parse::<u32>().ok()),
        Some(15)
    );
    assert!(p.all_complete.is_match("all tasks are done"));
    assert!(!p.all_complete.is_match("overall tasks are done"));
}

#[yare::parameterized(
    bash = { "  Bash(cargo test)", true },
    glob = { "Glob(**/*.rs)", true },
    prose = { "run the tests", false },
)]
fn tool_invocation_filter(line: &str, expected: bool) {
    assert_eq!(is_tool_invocation(line), expected);
}

#[yare::parameterized(
    ill = { "I'll refactor the parser next", true },
    let_me = { "Let me look at the session loop", true },
    now_i = { "Now I need to wire the fanout", true },
    todo = { "- [ ] refactor the parser", false },
)]
fn narrator_filter(line: &str, expected: bool) {
    assert_eq!(is_narrator_line(line), expected);
}

#[yare::parameterized(
    markup = { "When done, output exactly: <promise>DONE_X</promise>", true },
    output_colon = { "output: ALL_TASKS_COMPLETE", true },
    phrase_doc = { "your completion phrase is ALL_TASKS_COMPLETE", true },
    report = { "ALL_TASKS_COMPLETE", false },
)]
fn prompt_context_detection(line: &str, expected: bool) {
    assert_eq!(is_prompt_context(line), expected);
}

#[test]
fn prefilter_hits_on_promise_markup() {
    assert!(auto_enable_prefilter("please <promise>X</promise>"));
    assert!(auto_enable_prefilter("Ralph iteration 2 of 9"));
    assert!(!auto_enable_prefilter("compiling 143 crates"));
}

#[test]
fn completion_sentences() {
    assert!(is_completion_sentence("  All tasks complete, shutting down."));
    assert!(is_completion_sentence("There is nothing remaining to do"));
    assert!(!is_completion_sentence("three tasks remaining"));
}
