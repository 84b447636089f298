// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::breaker::BreakerState;
use super::machine::CycleStats;
use super::RespawnState;

/// Compute the 0–100 controller health score.
///
/// Observability only; nothing gates on this value. Weighted from the
/// cycle-success ratio, circuit-breaker state, AI-checker error rate, and
/// stuck-recovery count.
pub fn health_score(state: RespawnState, breaker: BreakerState, stats: &CycleStats) -> u8 {
    let mut score: f64 = 100.0;

    if stats.cycles_started > 0 {
        let success = stats.cycles_with_progress as f64 / stats.cycles_started as f64;
        score -= (1.0 - success.min(1.0)) * 40.0;
    }

    score -= match breaker {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 15.0,
        BreakerState::Open => 40.0,
    };

    if stats.ai_checks > 0 {
        let error_rate = stats.ai_errors as f64 / stats.ai_checks as f64;
        score -= error_rate.min(1.0) * 10.0;
    }

    score -= (stats.stuck_recoveries as f64 * 5.0).min(10.0);

    if state == RespawnState::Broken {
        score = score.min(10.0);
    }

    score.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
