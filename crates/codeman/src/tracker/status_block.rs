// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Opening delimiter of a scripted status region.
pub const BLOCK_START: &str = "---RALPH_STATUS---";
/// Closing delimiter of a scripted status region.
pub const BLOCK_END: &str = "---END_RALPH_STATUS---";

/// Upper bound on lines collected inside one region; runaway regions are
/// dropped as parse anomalies.
const MAX_BLOCK_LINES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStatus {
    InProgress,
    Complete,
    Blocked,
    Error,
}

impl BlockStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETE" | "COMPLETED" => Some(Self::Complete),
            "BLOCKED" => Some(Self::Blocked),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestsStatus {
    Passing,
    Failing,
    NotRun,
}

impl TestsStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PASSING" | "PASS" => Some(Self::Passing),
            "FAILING" | "FAIL" => Some(Self::Failing),
            "NOT_RUN" | "NOTRUN" | "SKIPPED" => Some(Self::NotRun),
            _ => None,
        }
    }
}

/// One parsed `RALPH_STATUS` region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBlock {
    pub status: BlockStatus,
    pub tasks_completed: Option<u32>,
    pub files_modified: Option<u32>,
    pub tests_status: Option<TestsStatus>,
    pub work_type: Option<String>,
    pub exit_signal: Option<bool>,
    pub recommendation: Option<String>,
}

/// Counters accumulated across all valid blocks of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeStats {
    pub blocks: u32,
    pub tasks_completed: u32,
    pub files_modified: u32,
    pub complete_blocks: u32,
}

/// Streaming parser for delimited status regions.
#[derive(Debug, Default)]
pub struct StatusBlockParser {
    collecting: Option<Vec<String>>,
    pub cumulative: CumulativeStats,
}

impl StatusBlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stripped line. Returns a block when a region closes and
    /// parses validly; `true` in the second slot while inside a region
    /// (callers skip other line-level parsing there).
    pub fn on_line(&mut self, line: &str) -> (Option<StatusBlock>, bool) {
        let trimmed = line.trim();
        match self.collecting {
            None => {
                if trimmed == BLOCK_START {
                    self.collecting = Some(Vec::new());
                    return (None, true);
                }
                (None, false)
            }
            Some(ref mut lines) => {
                if trimmed == BLOCK_END {
                    let lines = std::mem::take(lines);
                    self.collecting = None;
                    let block = parse_block(&lines);
                    if let Some(ref b) = block {
                        self.cumulative.blocks += 1;
                        self.cumulative.tasks_completed += b.tasks_completed.unwrap_or(0);
                        self.cumulative.files_modified += b.files_modified.unwrap_or(0);
                        if b.status == BlockStatus::Complete {
                            self.cumulative.complete_blocks += 1;
                        }
                    }
                    return (block, true);
                }
                if lines.len() >= MAX_BLOCK_LINES {
                    // Runaway region: drop it and resume normal parsing.
                    self.collecting = None;
                    return (None, false);
                }
                lines.push(trimmed.to_owned());
                (None, true)
            }
        }
    }

    pub fn in_block(&self) -> bool {
        self.collecting.is_some()
    }
}

/// Parse collected `KEY: value` lines. Blocks without a valid `STATUS` are
/// discarded.
fn parse_block(lines: &[String]) -> Option<StatusBlock> {
    let mut status = None;
    let mut tasks_completed = None;
    let mut files_modified = None;
    let mut tests_status = None;
    let mut work_type = None;
    let mut exit_signal = None;
    let mut recommendation = None;

    for line in lines {
        let Some((key, value)) = line.split_once(':') else { continue };
        let value = value.trim();
        match key.trim().to_uppercase().as_str() {
            "STATUS" => status = BlockStatus::parse(value),
            "TASKS_COMPLETED_THIS_LOOP" => tasks_completed = value.parse().ok(),
            "FILES_MODIFIED" => files_modified = value.parse().ok(),
            "TESTS_STATUS" => tests_status = TestsStatus::parse(value),
            "WORK_TYPE" => work_type = Some(value.to_owned()),
            "EXIT_SIGNAL" => exit_signal = Some(value.eq_ignore_ascii_case("true")),
            "RECOMMENDATION" => recommendation = Some(value.to_owned()),
            _ => {}
        }
    }

    Some(StatusBlock {
        status: status?,
        tasks_completed,
        files_modified,
        tests_status,
        work_type,
        exit_signal,
        recommendation,
    })
}

#[cfg(test)]
#[path = "status_block_tests.rs"]
mod tests;
