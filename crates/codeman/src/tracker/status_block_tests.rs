// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn feed(parser: &mut StatusBlockParser, lines: &[&str]) -> Vec<StatusBlock> {
    let mut blocks = Vec::new();
    for line in lines {
        if let (Some(b), _) = parser.on_line(line) {
            blocks.push(b);
        }
    }
    blocks
}

#[test]
fn parses_a_full_block() {
    let mut parser = StatusBlockParser::new();
    let blocks = feed(
        &mut parser,
        &[
            "---RALPH_STATUS---",
            "STATUS: IN_PROGRESS",
            "TASKS_COMPLETED_THIS_LOOP: 2",
            "FILES_MODIFIED: 5",
            "TESTS_STATUS: PASSING",
            "WORK_TYPE: refactor",
            "EXIT_SIGNAL: false",
            "RECOMMENDATION: keep going",
            "---END_RALPH_STATUS---",
        ],
    );
    assert_eq!(blocks.len(), 1);
    let b = &blocks[0];
    assert_eq!(b.status, BlockStatus::InProgress);
    assert_eq!(b.tasks_completed, Some(2));
    assert_eq!(b.files_modified, Some(5));
    assert_eq!(b.tests_status, Some(TestsStatus::Passing));
    assert_eq!(b.work_type.as_deref(), Some("refactor"));
    assert_eq!(b.exit_signal, Some(false));
    assert_eq!(b.recommendation.as_deref(), Some("keep going"));
}

#[test]
fn block_without_status_is_discarded() {
    let mut parser = StatusBlockParser::new();
    let blocks = feed(
        &mut parser,
        &["---RALPH_STATUS---", "TASKS_COMPLETED_THIS_LOOP: 3", "---END_RALPH_STATUS---"],
    );
    assert!(blocks.is_empty());
    assert_eq!(parser.cumulative.blocks, 0);
}

#[test]
fn counters_accumulate_across_blocks() {
    let mut parser = StatusBlockParser::new();
    feed(
        &mut parser,
        &[
            "---RALPH_STATUS---",
            "STATUS: IN_PROGRESS",
            "TASKS_COMPLETED_THIS_LOOP: 2",
            "FILES_MODIFIED: 1",
            "---END_RALPH_STATUS---",
            "---RALPH_STATUS---",
            "STATUS: COMPLETE",
            "TASKS_COMPLETED_THIS_LOOP: 1",
            "FILES_MODIFIED: 4",
            "---END_RALPH_STATUS---",
        ],
    );
    assert_eq!(parser.cumulative.blocks, 2);
    assert_eq!(parser.cumulative.tasks_completed, 3);
    assert_eq!(parser.cumulative.files_modified, 5);
    assert_eq!(parser.cumulative.complete_blocks, 1);
}

#[test]
fn in_block_suppresses_other_parsing() {
    let mut parser = StatusBlockParser::new();
    let (_, inside) = parser.on_line("---RALPH_STATUS---");
    assert!(inside);
    let (_, inside) = parser.on_line("STATUS: BLOCKED");
    assert!(inside);
    assert!(parser.in_block());
    let (block, _) = parser.on_line("---END_RALPH_STATUS---");
    assert_eq!(block.map(|b| b.status), Some(BlockStatus::Blocked));
    assert!(!parser.in_block());
}

#[test]
fn runaway_region_is_dropped() {
    let mut parser = StatusBlockParser::new();
    parser.on_line("---RALPH_STATUS---");
    for i in 0..100 {
        parser.on_line(&format!("NOISE_{i}: x"));
    }
    assert!(!parser.in_block());
    // A later well-formed block still parses.
    let blocks = feed(
        &mut parser,
        &["---RALPH_STATUS---", "STATUS: ERROR", "---END_RALPH_STATUS---"],
    );
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].status, BlockStatus::Error);
}

#[test]
fn keys_are_case_insensitive() {
    let mut parser = StatusBlockParser::new();
    let blocks = feed(
        &mut parser,
        &["---RALPH_STATUS---", "status: complete", "exit_signal: TRUE", "---END_RALPH_STATUS---"],
    );
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].status, BlockStatus::Complete);
    assert_eq!(blocks[0].exit_signal, Some(true));
}
