// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use crate::tracker::status_block::{BlockStatus, StatusBlock, TestsStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerReason {
    NoProgress,
    BlockedStatus,
    TestsFailingTooLong,
    ManualReset,
    SessionGone,
}

impl BreakerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoProgress => "no_progress",
            Self::BlockedStatus => "blocked_status",
            Self::TestsFailingTooLong => "tests_failing_too_long",
            Self::ManualReset => "manual_reset",
            Self::SessionGone => "session_gone",
        }
    }
}

/// Safety interlock that halts the respawn controller when cycles stop
/// making progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub state: BreakerState,
    pub reason: Option<BreakerReason>,
    pub consecutive_no_progress: u32,
    pub consecutive_tests_failing: u32,
    pub last_transition_ms: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            reason: None,
            consecutive_no_progress: 0,
            consecutive_tests_failing: 0,
            last_transition_ms: 0,
        }
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Feed one cycle's status block. Returns `true` when the breaker state
    /// changed.
    pub fn on_status_block(&mut self, block: &StatusBlock, now_ms: u64) -> bool {
        // A blocked agent opens the breaker immediately.
        if block.status == BlockStatus::Blocked {
            return self.transition(BreakerState::Open, Some(BreakerReason::BlockedStatus), now_ms);
        }

        let tasks = block.tasks_completed.unwrap_or(0);
        let files = block.files_modified.unwrap_or(0);

        if block.tests_status == Some(TestsStatus::Failing) && files > 0 {
            self.consecutive_tests_failing += 1;
        } else {
            self.consecutive_tests_failing = 0;
        }

        if tasks == 0 && files == 0 {
            self.consecutive_no_progress += 1;
        } else {
            self.consecutive_no_progress = 0;
        }

        if self.consecutive_tests_failing >= 5 {
            return self.transition(
                BreakerState::Open,
                Some(BreakerReason::TestsFailingTooLong),
                now_ms,
            );
        }
        if self.consecutive_no_progress >= 3 {
            return self.transition(BreakerState::Open, Some(BreakerReason::NoProgress), now_ms);
        }
        if self.consecutive_no_progress == 2 {
            return self.transition(BreakerState::HalfOpen, Some(BreakerReason::NoProgress), now_ms);
        }
        if tasks > 0 || files > 0 {
            return self.transition(BreakerState::Closed, None, now_ms);
        }
        false
    }

    /// Force OPEN (injection failed because the session vanished).
    pub fn force_open(&mut self, reason: BreakerReason, now_ms: u64) -> bool {
        self.transition(BreakerState::Open, Some(reason), now_ms)
    }

    /// Manual reset via the API.
    pub fn reset(&mut self, now_ms: u64) -> bool {
        self.consecutive_no_progress = 0;
        self.consecutive_tests_failing = 0;
        self.transition(BreakerState::Closed, Some(BreakerReason::ManualReset), now_ms)
    }

    fn transition(
        &mut self,
        state: BreakerState,
        reason: Option<BreakerReason>,
        now_ms: u64,
    ) -> bool {
        if self.state == state && self.reason == reason {
            return false;
        }
        self.state = state;
        self.reason = reason;
        self.last_transition_ms = now_ms;
        true
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
