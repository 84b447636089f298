// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AI arbiter: a one-shot headless agent invocation that looks at a recent
//! terminal window and answers IDLE / WORKING / ERROR.

use std::process::Stdio;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Consecutive errors after which the arbiter disables itself.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

const PROMPT: &str = "You are watching a coding agent's terminal. Reply with exactly one word \
                      on the first line: IDLE if the agent is waiting for input, WORKING if it \
                      is still making progress, ERROR if it is stuck on an error. You may add \
                      one short sentence of reasoning on the second line.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Idle,
    Working,
    Error,
}

/// Result of one arbiter check.
#[derive(Debug, Clone)]
pub struct Judgement {
    pub verdict: Verdict,
    pub reasoning: String,
    pub duration_ms: u64,
}

/// Why a check did not produce a judgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    /// A check is already in flight; calls are cooperative.
    AlreadyChecking,
    /// On cooldown after a previous non-IDLE verdict.
    OnCooldown,
    /// Disabled after too many consecutive errors.
    Disabled,
    /// The invocation failed or produced an unparseable reply.
    Failed(String),
    /// The invocation exceeded its time budget.
    TimedOut,
    /// The check was cancelled; the verdict is discarded.
    Cancelled,
}

struct ArbiterState {
    checking: bool,
    cooldown_until_ms: u64,
    consecutive_errors: u32,
    disabled: bool,
}

/// Shared per-session arbiter with cooldown and self-disable discipline.
pub struct Arbiter {
    /// Headless agent binary, e.g. `claude`.
    command: String,
    timeout: Duration,
    cooldown: Duration,
    error_cooldown: Duration,
    max_consecutive_errors: u32,
    state: Mutex<ArbiterState>,
}

impl Arbiter {
    pub fn new(command: impl Into<String>, timeout: Duration, cooldown: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            cooldown,
            error_cooldown: Duration::from_secs(60),
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            state: Mutex::new(ArbiterState {
                checking: false,
                cooldown_until_ms: 0,
                consecutive_errors: 0,
                disabled: false,
            }),
        }
    }

    pub fn with_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_cooldown = cooldown;
        self
    }

    pub fn with_max_consecutive_errors(mut self, n: u32) -> Self {
        self.max_consecutive_errors = n;
        self
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().disabled
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.state.lock().consecutive_errors
    }

    /// Run one check over the terminal window.
    ///
    /// Rejects concurrent calls, refuses while on cooldown or disabled, and
    /// discards the verdict when `cancel` fires mid-flight.
    pub async fn check(
        &self,
        window: &str,
        now_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<Judgement, CheckFailure> {
        {
            let mut state = self.state.lock();
            if state.disabled {
                return Err(CheckFailure::Disabled);
            }
            if state.checking {
                return Err(CheckFailure::AlreadyChecking);
            }
            if now_ms < state.cooldown_until_ms {
                return Err(CheckFailure::OnCooldown);
            }
            state.checking = true;
        }

        let result = self.run_once(window, cancel).await;

        let mut state = self.state.lock();
        state.checking = false;
        match &result {
            Ok(judgement) => match judgement.verdict {
                Verdict::Idle => {
                    state.consecutive_errors = 0;
                }
                Verdict::Working => {
                    state.consecutive_errors = 0;
                    state.cooldown_until_ms = now_ms + self.cooldown.as_millis() as u64;
                }
                Verdict::Error => {
                    state.consecutive_errors += 1;
                    state.cooldown_until_ms = now_ms + self.error_cooldown.as_millis() as u64;
                }
            },
            Err(CheckFailure::Cancelled) => {
                // No side effects for a cancelled check.
            }
            Err(_) => {
                state.consecutive_errors += 1;
                state.cooldown_until_ms = now_ms + self.error_cooldown.as_millis() as u64;
            }
        }
        if !state.disabled && state.consecutive_errors >= self.max_consecutive_errors {
            state.disabled = true;
            warn!(errors = state.consecutive_errors, "arbiter disabled after consecutive errors");
            drop(state);
            return Err(CheckFailure::Disabled);
        }
        result
    }

    async fn run_once(
        &self,
        window: &str,
        cancel: &CancellationToken,
    ) -> Result<Judgement, CheckFailure> {
        let started = Instant::now();

        let mut child = tokio::process::Command::new(&self.command)
            .args(["-p", PROMPT])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckFailure::Failed(format!("spawn: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(window.as_bytes()).await {
                debug!("arbiter stdin write failed: {e}");
            }
            drop(stdin);
        }

        // `kill_on_drop` tears the child down when the wait task is aborted.
        let mut wait = tokio::spawn(child.wait_with_output());
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                wait.abort();
                return Err(CheckFailure::Cancelled);
            }
            _ = tokio::time::sleep(self.timeout) => {
                wait.abort();
                return Err(CheckFailure::TimedOut);
            }
            output = &mut wait => {
                output
                    .map_err(|e| CheckFailure::Failed(format!("join: {e}")))?
                    .map_err(|e| CheckFailure::Failed(format!("wait: {e}")))?
            }
        };

        if !output.status.success() {
            return Err(CheckFailure::Failed(format!("exit status {:?}", output.status.code())));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let (verdict, reasoning) = parse_reply(&text)
            .ok_or_else(|| CheckFailure::Failed(format!("unparseable reply: {text:.80}")))?;

        Ok(Judgement {
            verdict,
            reasoning,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Parse the first IDLE/WORKING/ERROR token out of the reply.
pub fn parse_reply(text: &str) -> Option<(Verdict, String)> {
    for line in text.lines() {
        let token = line.trim().trim_matches(|c: char| !c.is_ascii_alphabetic()).to_uppercase();
        let verdict = match token.as_str() {
            "IDLE" => Some(Verdict::Idle),
            "WORKING" => Some(Verdict::Working),
            "ERROR" => Some(Verdict::Error),
            _ => None,
        };
        if let Some(verdict) = verdict {
            let reasoning =
                text.lines().skip_while(|l| *l != line).skip(1).collect::<Vec<_>>().join(" ");
            return Some((verdict, reasoning.trim().to_owned()));
        }
    }
    None
}

#[cfg(test)]
#[path = "arbiter_tests.rs"]
mod tests;
