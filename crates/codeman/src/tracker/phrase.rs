// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion-phrase occurrence tracking.
//!
//! The prompt that teaches the agent its completion phrase is itself echoed
//! to the terminal, so the first tagged occurrence must register the phrase
//! without signaling completion. Completion fires on the second occurrence,
//! or on any occurrence while the loop is already active, and at most once
//! per phrase until the tracker is reset.

use std::collections::{HashMap, HashSet};

use super::similarity::levenshtein;

/// Cap on the occurrence map; trimmed by lowest count when exceeded.
pub const MAX_PHRASE_OCCURRENCES: usize = 50;

/// Outcome of scanning one line for phrase occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhraseHit {
    /// Nothing phrase-related on this line.
    None,
    /// First tagged sighting: the phrase is now the expected completion
    /// phrase (or a known alternate was re-echoed); no completion yet.
    Registered(String),
    /// Completion signaled for this phrase.
    Completed(String),
}

#[derive(Debug, Default)]
pub struct PhraseTracker {
    /// Primary completion phrase (from config or first tagged sighting).
    expected: Option<String>,
    alternates: Vec<String>,
    /// Tagged/bare occurrence counts per phrase.
    occurrences: HashMap<String, u32>,
    /// Phrases that already signaled completion (once per phrase).
    completed: HashSet<String>,
    /// Phrases already validation-checked (warn once).
    validated: HashSet<String>,
}

impl PhraseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected(&self) -> Option<&str> {
        self.expected.as_deref()
    }

    pub fn alternates(&self) -> &[String] {
        &self.alternates
    }

    /// Set the primary phrase from configuration (overrides detection).
    pub fn set_expected(&mut self, phrase: String) {
        self.expected = Some(phrase);
    }

    pub fn add_alternate(&mut self, phrase: String) {
        if !self.alternates.contains(&phrase) {
            self.alternates.push(phrase);
        }
    }

    pub fn remove_alternate(&mut self, phrase: &str) {
        self.alternates.retain(|p| p != phrase);
    }

    /// Forget all occurrence state (controller reset / session soft-reset).
    pub fn reset(&mut self) {
        self.occurrences.clear();
        self.completed.clear();
    }

    /// Record a tagged `<promise>…</promise>` occurrence.
    pub fn on_tagged(&mut self, phrase: &str, loop_active: bool) -> PhraseHit {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            return PhraseHit::None;
        }
        let count = self.bump(phrase);

        if self.completed.contains(phrase) {
            return PhraseHit::None;
        }
        if loop_active || count >= 2 {
            self.completed.insert(phrase.to_owned());
            return PhraseHit::Completed(phrase.to_owned());
        }
        if self.expected.is_none() {
            self.expected = Some(phrase.to_owned());
        }
        PhraseHit::Registered(phrase.to_owned())
    }

    /// Scan a line for a bare (untagged) phrase appearance.
    ///
    /// Counts only when the tagged form was already seen once or the loop is
    /// explicitly active; prompt-context suppression happens at the caller.
    pub fn on_bare_line(&mut self, line: &str, loop_active: bool) -> PhraseHit {
        let known: Vec<String> =
            self.expected.iter().cloned().chain(self.alternates.iter().cloned()).collect();
        if known.is_empty() {
            return PhraseHit::None;
        }

        let upper_line = line.to_uppercase();
        for phrase in known {
            let seen_tagged = self.occurrences.get(&phrase).copied().unwrap_or(0) >= 1;
            if !seen_tagged && !loop_active {
                continue;
            }
            if self.completed.contains(&phrase) {
                continue;
            }
            if fuzzy_line_match(&upper_line, &phrase.to_uppercase()) {
                self.bump(&phrase);
                self.completed.insert(phrase.clone());
                return PhraseHit::Completed(phrase);
            }
        }
        PhraseHit::None
    }

    /// Whether the phrase should be validation-checked (returns `true` the
    /// first time only).
    pub fn first_validation(&mut self, phrase: &str) -> bool {
        self.validated.insert(phrase.to_owned())
    }

    fn bump(&mut self, phrase: &str) -> u32 {
        let count = self.occurrences.entry(phrase.to_owned()).or_insert(0);
        *count += 1;
        let count = *count;

        // Trim lowest-count entries when over the cap; the expected phrase
        // is never trimmed.
        while self.occurrences.len() > MAX_PHRASE_OCCURRENCES {
            let victim = self
                .occurrences
                .iter()
                .filter(|(k, _)| Some(k.as_str()) != self.expected.as_deref())
                .min_by_key(|(_, c)| **c)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    self.occurrences.remove(&k);
                }
                None => break,
            }
        }
        count
    }
}

/// Fuzzy containment: exact substring, or any token (or the whole trimmed
/// line) within Levenshtein distance 2 of the phrase. Inputs are uppercased
/// by the caller.
fn fuzzy_line_match(upper_line: &str, upper_phrase: &str) -> bool {
    if upper_line.contains(upper_phrase) {
        return true;
    }
    if levenshtein(upper_line.trim(), upper_phrase) <= 2 {
        return true;
    }
    upper_line
        .split(|c: char| c.is_whitespace() || c == ':' || c == '.' || c == ',' || c == '!')
        .filter(|t| !t.is_empty())
        .any(|token| levenshtein(token, upper_phrase) <= 2)
}

/// Validation verdict for a newly observed completion phrase.
///
/// Weak phrases (common words, too short, all digits) trigger a
/// `phraseValidationWarning` with a suggested replacement.
pub fn validate_phrase(phrase: &str) -> Option<String> {
    const COMMON: &[&str] = &[
        "DONE", "OK", "OKAY", "COMPLETE", "COMPLETED", "FINISHED", "SUCCESS", "YES", "END", "EXIT",
    ];

    let canon: String =
        phrase.to_uppercase().chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    let weak = COMMON.contains(&canon.as_str())
        || canon.chars().count() < 6
        || (!canon.is_empty() && canon.chars().all(|c| c.is_ascii_digit()));

    if !weak {
        return None;
    }
    if canon.is_empty() {
        return Some("ALL_TASKS_COMPLETE".to_owned());
    }
    Some(format!("{canon}_TASKS_COMPLETE"))
}

#[cfg(test)]
#[path = "phrase_tests.rs"]
mod tests;
