// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-compiled pattern battery for the Ralph tracker.
//!
//! Compiled `Regex` values are immutable, but every tracker owns its own
//! `Patterns` instance anyway: all parser state lives with the tracker and
//! nothing mutable is ever shared across sessions.

use regex::Regex;

pub struct Patterns {
    /// Literal `<promise>PHRASE</promise>` marker.
    pub promise_tag: Regex,
    /// Iteration / loop / cycle counter lines, with optional `of N` cap.
    pub iteration: Regex,
    /// Auto-enable battery, run after the cheap substring prefilter.
    pub auto_enable: Vec<Regex>,
    /// `- [ ] content` checkbox lines.
    pub checkbox: Regex,
    /// Indicator-icon todo lines.
    pub indicator_icon: Regex,
    /// `content (pending)` style lines.
    pub paren_status: Regex,
    /// Native-icon todo lines.
    pub native_icon: Regex,
    /// Checkmark-family todo lines.
    pub checkmark: Regex,
    /// `Task #N created: content`.
    pub task_created: Regex,
    /// `Task #N updated: status → X`.
    pub task_updated: Regex,
    /// Bounded "all tasks complete" announcement.
    pub all_complete: Regex,
    /// Priority token inside todo content.
    pub priority: Regex,
    /// Complexity annotation inside todo content.
    pub complexity: Regex,
    /// Estimated duration annotation, e.g. `~30m` / `~2h`.
    pub duration: Regex,
}

impl Patterns {
    pub fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            promise_tag: Regex::new(r"<promise>([^<>]{1,256}?)</promise>")?,
            iteration: Regex::new(
                r"(?i)\b(?:iteration|loop|cycle)\s*#?\s*(\d{1,5})(?:\s*(?:of|/)\s*(\d{1,5}))?\b",
            )?,
            auto_enable: vec![
                Regex::new(r"(?i)\bralph\s+(?:loop|iteration|mode|orchestrator)\b")?,
                Regex::new(r"---RALPH_STATUS---")?,
                Regex::new(r"<promise>")?,
                Regex::new(r"(?i)^\s*(?:iteration|loop|cycle)\s*#?\s*\d+\s*(?:of|/)\s*\d+\b")?,
            ],
            checkbox: Regex::new(r"^\s*(?:[-*+]\s+)?\[([ xX~\-])\]\s+(.+)$")?,
            indicator_icon: Regex::new(r"^\s*([\u{2610}\u{25d0}\u{2612}])\s+(.+)$")?,
            paren_status: Regex::new(
                r"(?i)^\s*(?:[-*+]\s+)?(.+?)\s*\((pending|in[ _-]?progress|completed?|done)\)\s*$",
            )?,
            native_icon: Regex::new(r"^\s*([\u{25cb}\u{25c9}\u{25cf}])\s+(.+)$")?,
            checkmark: Regex::new(r"^\s*([\u{2713}\u{2714}\u{2717}])\s+(.+)$")?,
            task_created: Regex::new(r"(?i)\btask\s+#(\d{1,4})\s+created(?::\s*(.+))?\s*$")?,
            task_updated: Regex::new(
                r"(?i)\btask\s+#(\d{1,4})\s+updated:\s*status\s*(?:\u{2192}|->)\s*([a-z_ ]+)\s*$",
            )?,
            all_complete: Regex::new(
                r"(?i)^all\s+(?:(\d{1,4})\s+)?(?:tasks?|todos?|items?|files?)\s+(?:have\s+been\s+|are\s+|were\s+)?(?:complete|completed|done|finished|created)\b",
            )?,
            priority: Regex::new(r"\b(P[0-2])\b")?,
            complexity: Regex::new(r"(?i)\((trivial|simple|moderate|complex)\)")?,
            duration: Regex::new(r"~\s*(\d{1,4})\s*(m|min|h|hr)\b")?,
        })
    }
}

/// Cheap substring prefilter run before the auto-enable regex battery.
pub fn auto_enable_prefilter(chunk: &str) -> bool {
    const NEEDLES: &[&str] = &["ralph", "RALPH", "Ralph", "<promise>", "teration", "ycle"];
    NEEDLES.iter().any(|n| chunk.contains(n))
}

/// Tool-invocation lines are never todos.
pub fn is_tool_invocation(line: &str) -> bool {
    const TOOLS: &[&str] = &[
        "Bash(", "Glob(", "Grep(", "Read(", "Write(", "Edit(", "Task(", "WebFetch(", "WebSearch(",
        "NotebookEdit(",
    ];
    TOOLS.iter().any(|t| line.contains(t))
}

/// Narrator lines ("I'll refactor…") are prose, not todos.
pub fn is_narrator_line(line: &str) -> bool {
    const PREFIXES: &[&str] =
        &["I'll ", "I\u{2019}ll ", "Let me ", "Now I", "I'm ", "I\u{2019}m ", "I will ", "Next, I"];
    let trimmed = line.trim_start();
    PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Whether a line is "prompt context": it quotes the completion-phrase
/// template rather than reporting completion.
pub fn is_prompt_context(line: &str) -> bool {
    line.contains("<promise>")
        || line.contains("output:")
        || line.contains("completion phrase")
        || line.contains("output exactly")
}

/// English completion sentences counted as exit-gate indicators.
pub fn is_completion_sentence(line: &str) -> bool {
    const SENTENCES: &[&str] = &[
        "all tasks complete",
        "all tasks are complete",
        "nothing remaining",
        "no remaining tasks",
        "no tasks remaining",
        "everything is done",
        "all work is complete",
    ];
    let lower = line.to_lowercase();
    SENTENCES.iter().any(|s| lower.contains(s))
}

#[cfg(test)]
#[path = "patterns_tests.rs"]
mod tests;
