// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure respawn state machine.
//!
//! The machine consumes externally visible inputs (session signals, tracker
//! events, generation-stamped timer firings, arbiter verdicts) and returns
//! effects for the controller task to execute. Determinism: a fresh machine
//! fed the same input sequence ends in the same state.

use crate::tracker::status_block::{BlockStatus, StatusBlock};

use super::breaker::{BreakerReason, CircuitBreaker};
use super::{RespawnConfig, RespawnState};

/// Timers the machine can arm. Exactly one timer is live at a time; arming
/// a new one bumps the generation and strands any timer already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// No-output watchdog while OBSERVING.
    IdleTimeout,
    /// Confirmation window while SUSPECTED_IDLE.
    ConfirmIdle,
    /// COOLING_DOWN expiry.
    Cooldown,
}

/// Externally visible inputs, delivered through the controller's single
/// ordered inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Respawn enabled via the API.
    Start,
    /// Respawn disabled via the API.
    Stop,
    /// Manual circuit-breaker reset.
    ManualReset,
    /// Session became busy.
    Working,
    /// Session reported the idle prompt. Carries the token count and output
    /// tail sampled by the controller at signal time.
    Idle { tokens: u64, tail_hash: u64 },
    /// The session stopped or errored out.
    SessionStopped,
    /// New terminal output arrived.
    Output { tokens: u64, tail_hash: u64 },
    /// Tracker signaled loop completion.
    CompletionDetected,
    /// Tracker parsed a scripted status block.
    StatusBlock(StatusBlock),
    /// Tracker saw an English completion sentence.
    CompletionIndicator,
    /// A scheduled timer fired. `tokens` / `tail_hash` are sampled by the
    /// controller at fire time for the quiescence comparison.
    TimerFired { generation: u64, kind: TimerKind, tokens: u64, tail_hash: u64 },
    /// Arbiter outcome for the in-flight check.
    Verdict(VerdictInput),
    /// Result of the inject write.
    InjectResult { session_gone: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictInput {
    Idle,
    Working,
    Error,
    TimedOut,
    /// The arbiter disabled itself; degrade to heuristics permanently.
    Disabled,
}

/// Effects for the controller task to execute, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartTimer { kind: TimerKind, after_ms: u64, generation: u64 },
    /// Cancel any in-flight arbiter check.
    CancelAiCheck,
    RequestAiCheck,
    /// Inject the next prompt through the session write path.
    Inject,
    Emit(Emission),
}

/// Observable emissions, forwarded to the event fanout.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    StateChanged { from: RespawnState, to: RespawnState, reason: String },
    CycleStarted { cycle: u32 },
    Blocked { reason: String },
    ExitGateMet,
    BreakerChanged { breaker: CircuitBreaker },
}

/// Cycle statistics feeding the health score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles_started: u32,
    pub cycles_with_progress: u32,
    pub ai_checks: u32,
    pub ai_errors: u32,
    pub stuck_recoveries: u32,
}

pub struct Machine {
    pub config: RespawnConfig,
    state: RespawnState,
    generation: u64,
    breaker: CircuitBreaker,
    cycles: u32,
    stats: CycleStats,

    /// Snapshot taken on SUSPECTED_IDLE entry for the quiescence check.
    entry_tokens: u64,
    entry_tail_hash: u64,
    /// Last observed output timestamp (heuristic fallback).
    last_output_ms: u64,

    /// Dual-condition exit gate accumulators.
    completion_indicators: u32,
    last_exit_signal: bool,

    ai_disabled: bool,
}

impl Machine {
    pub fn new(config: RespawnConfig) -> Self {
        Self {
            config,
            state: RespawnState::Dormant,
            generation: 0,
            breaker: CircuitBreaker::new(),
            cycles: 0,
            stats: CycleStats::default(),
            entry_tokens: 0,
            entry_tail_hash: 0,
            last_output_ms: 0,
            completion_indicators: 0,
            last_exit_signal: false,
            ai_disabled: false,
        }
    }

    pub fn state(&self) -> RespawnState {
        self.state
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Advance the machine. Effects must be executed in order.
    pub fn on_event(&mut self, input: Input, now_ms: u64) -> Vec<Effect> {
        let mut out = Vec::new();
        match input {
            Input::Start => {
                self.config.enabled = true;
            }
            Input::Stop => {
                self.config.enabled = false;
                if self.state != RespawnState::Dormant {
                    out.push(Effect::CancelAiCheck);
                    self.enter(RespawnState::Dormant, "stopped", &mut out);
                }
            }
            Input::ManualReset => {
                if self.breaker.reset(now_ms) {
                    out.push(Effect::Emit(Emission::BreakerChanged { breaker: self.breaker }));
                }
                if self.state == RespawnState::Broken {
                    self.enter(RespawnState::Dormant, "manual_reset", &mut out);
                }
            }
            Input::Working => {
                if !self.config.enabled {
                    return out;
                }
                match self.state {
                    RespawnState::Dormant | RespawnState::CoolingDown => {
                        self.enter(RespawnState::Observing, "working", &mut out);
                        self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, &mut out);
                    }
                    RespawnState::SuspectedIdle => {
                        self.enter(RespawnState::Observing, "working", &mut out);
                        self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, &mut out);
                    }
                    _ => {}
                }
            }
            Input::Idle { tokens, tail_hash } => {
                if self.state == RespawnState::Observing {
                    self.suspect_idle_with(tokens, tail_hash, &mut out);
                }
            }
            Input::SessionStopped => {
                out.push(Effect::CancelAiCheck);
                if self.state != RespawnState::Dormant && self.state != RespawnState::Broken {
                    self.enter(RespawnState::Dormant, "session_stopped", &mut out);
                }
            }
            Input::Output { tokens, tail_hash } => {
                self.last_output_ms = now_ms;
                match self.state {
                    RespawnState::Observing => {
                        // Rearm the no-output watchdog.
                        self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, &mut out);
                    }
                    RespawnState::SuspectedIdle => {
                        self.entry_tokens = tokens;
                        self.entry_tail_hash = tail_hash;
                        self.enter(RespawnState::Observing, "output", &mut out);
                        self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, &mut out);
                    }
                    RespawnState::AiChecking => {
                        out.push(Effect::CancelAiCheck);
                        self.enter(RespawnState::Observing, "output", &mut out);
                        self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, &mut out);
                    }
                    _ => {}
                }
            }
            Input::CompletionDetected => {
                if matches!(
                    self.state,
                    RespawnState::Observing
                        | RespawnState::SuspectedIdle
                        | RespawnState::AiChecking
                ) {
                    out.push(Effect::CancelAiCheck);
                    self.cool_down("completed", self.config.cooldown_ms, &mut out);
                }
            }
            Input::StatusBlock(block) => {
                self.on_status_block(&block, now_ms, &mut out);
            }
            Input::CompletionIndicator => {
                self.completion_indicators += 1;
                self.check_exit_gate(&mut out);
            }
            Input::TimerFired { generation, kind, tokens, tail_hash } => {
                // Stale generations are discarded silently.
                if generation != self.generation {
                    return out;
                }
                self.on_timer(kind, tokens, tail_hash, now_ms, &mut out);
            }
            Input::Verdict(verdict) => {
                if self.state == RespawnState::AiChecking {
                    self.on_verdict(verdict, now_ms, &mut out);
                }
            }
            Input::InjectResult { session_gone } => {
                if session_gone {
                    if self.breaker.force_open(BreakerReason::SessionGone, now_ms) {
                        out.push(Effect::Emit(Emission::BreakerChanged { breaker: self.breaker }));
                    }
                    out.push(Effect::Emit(Emission::Blocked {
                        reason: BreakerReason::SessionGone.as_str().to_owned(),
                    }));
                    self.enter(RespawnState::Broken, "session_gone", &mut out);
                }
            }
        }
        out
    }

    fn on_timer(
        &mut self,
        kind: TimerKind,
        tokens: u64,
        tail_hash: u64,
        now_ms: u64,
        out: &mut Vec<Effect>,
    ) {
        match (self.state, kind) {
            (RespawnState::Observing, TimerKind::IdleTimeout) => {
                self.suspect_idle_with(tokens, tail_hash, out);
            }
            (RespawnState::SuspectedIdle, TimerKind::ConfirmIdle) => {
                if tokens != self.entry_tokens || tail_hash != self.entry_tail_hash {
                    // Something changed during the confirmation window.
                    self.enter(RespawnState::Observing, "activity", out);
                    self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, out);
                    return;
                }
                if self.config.ai_idle_check && !self.ai_disabled {
                    self.stats.ai_checks += 1;
                    self.enter(RespawnState::AiChecking, "confirmed_idle", out);
                    out.push(Effect::RequestAiCheck);
                } else {
                    self.inject(now_ms, out);
                }
            }
            (RespawnState::CoolingDown, TimerKind::Cooldown) => {
                self.enter(RespawnState::Observing, "cooldown_elapsed", out);
                self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, out);
            }
            _ => {}
        }
    }

    fn on_verdict(&mut self, verdict: VerdictInput, now_ms: u64, out: &mut Vec<Effect>) {
        match verdict {
            VerdictInput::Idle => {
                self.inject(now_ms, out);
            }
            VerdictInput::Working => {
                self.cool_down("ai-says-working", self.config.ai_check_cooldown_ms, out);
            }
            VerdictInput::Error | VerdictInput::TimedOut | VerdictInput::Disabled => {
                self.stats.ai_errors += 1;
                if verdict == VerdictInput::Disabled {
                    self.ai_disabled = true;
                }
                // Heuristic fallback: total silence for long enough means
                // the agent really is idle.
                if now_ms.saturating_sub(self.last_output_ms) >= self.config.no_output_timeout_ms {
                    self.inject(now_ms, out);
                } else {
                    self.cool_down("ai-check-failed", self.config.cooldown_ms, out);
                }
            }
        }
    }

    fn on_status_block(&mut self, block: &StatusBlock, now_ms: u64, out: &mut Vec<Effect>) {
        if block.tasks_completed.unwrap_or(0) > 0 || block.files_modified.unwrap_or(0) > 0 {
            self.stats.cycles_with_progress += 1;
        }
        if self.breaker.on_status_block(block, now_ms) {
            out.push(Effect::Emit(Emission::BreakerChanged { breaker: self.breaker }));
        }
        if block.status == BlockStatus::Complete {
            self.completion_indicators += 1;
        }
        self.last_exit_signal = block.exit_signal.unwrap_or(false);
        self.check_exit_gate(out);
    }

    /// Dual-condition soft exit: cumulative completion indicators ≥ 2 and
    /// the most recent block set `EXIT_SIGNAL: true`.
    fn check_exit_gate(&mut self, out: &mut Vec<Effect>) {
        if self.completion_indicators < 2 || !self.last_exit_signal {
            return;
        }
        if matches!(
            self.state,
            RespawnState::Observing | RespawnState::SuspectedIdle | RespawnState::AiChecking
        ) {
            out.push(Effect::CancelAiCheck);
            out.push(Effect::Emit(Emission::ExitGateMet));
            self.cool_down("exit-gate", self.config.cooldown_ms, out);
        }
    }

    fn suspect_idle_with(&mut self, tokens: u64, tail_hash: u64, out: &mut Vec<Effect>) {
        self.entry_tokens = tokens;
        self.entry_tail_hash = tail_hash;
        self.enter(RespawnState::SuspectedIdle, "quiet", out);
        self.arm(TimerKind::ConfirmIdle, self.config.completion_confirm_ms, out);
    }

    fn inject(&mut self, now_ms: u64, out: &mut Vec<Effect>) {
        if self.breaker.is_open() {
            let reason = self
                .breaker
                .reason
                .map(|r| r.as_str().to_owned())
                .unwrap_or_else(|| "open".to_owned());
            out.push(Effect::Emit(Emission::Blocked { reason }));
            self.enter(RespawnState::Broken, "breaker_open", out);
            return;
        }
        if let Some(max) = self.config.max_cycles {
            if self.cycles >= max {
                self.cool_down("max-cycles", self.config.cooldown_ms, out);
                return;
            }
        }
        self.enter(RespawnState::Injecting, "inject", out);
        self.cycles += 1;
        self.stats.cycles_started += 1;
        if now_ms.saturating_sub(self.last_output_ms) >= self.config.no_output_timeout_ms {
            self.stats.stuck_recoveries += 1;
        }
        out.push(Effect::Emit(Emission::CycleStarted { cycle: self.cycles }));
        out.push(Effect::Inject);
        self.enter(RespawnState::Observing, "injected", out);
        self.arm(TimerKind::IdleTimeout, self.config.idle_timeout_ms, out);
    }

    fn cool_down(&mut self, reason: &str, duration_ms: u64, out: &mut Vec<Effect>) {
        self.enter_with_reason(RespawnState::CoolingDown, reason, out);
        self.arm(TimerKind::Cooldown, duration_ms, out);
    }

    fn enter(&mut self, next: RespawnState, reason: &str, out: &mut Vec<Effect>) {
        self.enter_with_reason(next, reason, out);
    }

    fn enter_with_reason(&mut self, next: RespawnState, reason: &str, out: &mut Vec<Effect>) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        out.push(Effect::Emit(Emission::StateChanged {
            from,
            to: next,
            reason: reason.to_owned(),
        }));
    }

    /// Arm a timer under a fresh generation; anything already in flight is
    /// stranded and discarded on fire.
    fn arm(&mut self, kind: TimerKind, after_ms: u64, out: &mut Vec<Effect>) {
        self.generation += 1;
        out.push(Effect::StartTimer { kind, after_ms, generation: self.generation });
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
