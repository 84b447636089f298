// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Busy/idle signals derived from stripped terminal output.

/// The visible prompt glyph the hosted agent renders on its input line.
pub const PROMPT_GLYPH: char = '\u{276f}';

/// Spinner glyphs the agent animates while working.
const SPINNER_GLYPHS: &[char] = &[
    '\u{280b}', '\u{2819}', '\u{2839}', '\u{2838}', '\u{283c}', '\u{2834}', '\u{2826}', '\u{2827}',
    '\u{2807}', '\u{280f}', '\u{273b}', '\u{2722}',
];

/// Words the agent prints while making progress.
const WORKING_WORDS: &[&str] =
    &["Thinking", "Writing", "Reading", "Running", "Searching", "esc to interrupt"];

/// Signal classified from one chunk of stripped output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    /// Known working indicator: flip to busy immediately.
    Working,
    /// Prompt glyph visible: arm the probably-idle timer.
    PromptGlyph,
    /// Non-whitespace output: disarm the probably-idle timer.
    Activity,
    /// Whitespace only; no state change.
    Quiet,
}

/// Classify a chunk. Working indicators win over the prompt glyph (a busy
/// redraw can repaint both).
pub fn classify_chunk(text: &str) -> ActivitySignal {
    if text.chars().any(|c| SPINNER_GLYPHS.contains(&c))
        || WORKING_WORDS.iter().any(|w| text.contains(w))
    {
        return ActivitySignal::Working;
    }

    // The prompt glyph counts when it starts a (possibly indented) line.
    for line in text.lines() {
        if line.trim_start().starts_with(PROMPT_GLYPH) {
            return ActivitySignal::PromptGlyph;
        }
    }

    if text.chars().any(|c| !c.is_whitespace()) {
        return ActivitySignal::Activity;
    }
    ActivitySignal::Quiet
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
