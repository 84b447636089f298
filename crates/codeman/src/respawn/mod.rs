// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Respawn controller: the per-session state machine that detects idleness
//! and drives the agent back to work.

pub mod breaker;
pub mod controller;
pub mod health;
pub mod machine;

use serde::{Deserialize, Serialize};

pub use breaker::{BreakerReason, BreakerState, CircuitBreaker};
pub use controller::RespawnController;
pub use machine::{Effect, Emission, Input, Machine, TimerKind};

/// Respawn controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RespawnState {
    Dormant,
    Observing,
    SuspectedIdle,
    AiChecking,
    Injecting,
    CoolingDown,
    Broken,
}

impl RespawnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dormant => "DORMANT",
            Self::Observing => "OBSERVING",
            Self::SuspectedIdle => "SUSPECTED_IDLE",
            Self::AiChecking => "AI_CHECKING",
            Self::Injecting => "INJECTING",
            Self::CoolingDown => "COOLING_DOWN",
            Self::Broken => "BROKEN",
        }
    }
}

impl std::fmt::Display for RespawnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session respawn configuration. Persisted with the session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RespawnConfig {
    pub enabled: bool,
    /// Prompt injected each cycle (unless ralph-todo mode supplies one).
    pub prompt: String,
    /// Select the next open tracked todo as the injected prompt.
    pub ralph_todo_mode: bool,
    pub idle_timeout_ms: u64,
    pub completion_confirm_ms: u64,
    pub no_output_timeout_ms: u64,
    pub cooldown_ms: u64,
    pub ai_idle_check: bool,
    pub ai_check_timeout_ms: u64,
    pub ai_check_cooldown_ms: u64,
    /// Delay between typing the prompt and pressing Enter.
    pub inter_step_delay_ms: u64,
    pub max_cycles: Option<u32>,
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt: "Continue working on the remaining tasks.".to_owned(),
            ralph_todo_mode: false,
            idle_timeout_ms: 30_000,
            completion_confirm_ms: 10_000,
            no_output_timeout_ms: 120_000,
            cooldown_ms: 30_000,
            ai_idle_check: false,
            ai_check_timeout_ms: 30_000,
            ai_check_cooldown_ms: 300_000,
            inter_step_delay_ms: 120,
            max_cycles: None,
        }
    }
}
