// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Umbrella record binding one session to a wall-clock deadline.
///
/// Stopping the run stops the underlying session but does not delete it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRun {
    pub id: String,
    pub session_id: String,
    pub prompt: String,
    pub started_at_ms: u64,
    pub duration_minutes: u64,
    pub deadline_ms: u64,
    pub tasks_completed: u32,
    pub cost: f64,
    pub active: bool,
}

impl ScheduledRun {
    pub fn new(
        id: String,
        session_id: String,
        prompt: String,
        started_at_ms: u64,
        duration_minutes: u64,
    ) -> Self {
        Self {
            id,
            session_id,
            prompt,
            started_at_ms,
            duration_minutes,
            deadline_ms: started_at_ms + duration_minutes * 60_000,
            tasks_completed: 0,
            cost: 0.0,
            active: true,
        }
    }
}
