// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-module scenario helpers for the spec suite in `tests/`.

use codeman::tracker::{RalphTracker, TrackerEvent};

/// Build a tracker with auto-enable left on (the default shipping state).
pub fn fresh_tracker() -> RalphTracker {
    match RalphTracker::new() {
        Ok(tracker) => tracker,
        Err(e) => unreachable!("tracker patterns must compile: {e:#}"),
    }
}

/// Collect completion phrases out of a batch of tracker events.
pub fn completions(events: &[TrackerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TrackerEvent::CompletionDetected { phrase } => Some(phrase.clone()),
            _ => None,
        })
        .collect()
}
