// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller task: owns the respawn machine, executes its effects, and
//! preserves arrival order through a single inbox.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::arbiter::{Arbiter, CheckFailure, Verdict};
use crate::clock::epoch_ms;
use crate::event::{names, Envelope};
use crate::fanout::EventFanout;
use crate::respawn::breaker::CircuitBreaker;
use crate::respawn::health::health_score;
use crate::respawn::machine::{Effect, Emission, Input, Machine, TimerKind, VerdictInput};
use crate::respawn::{RespawnConfig, RespawnState};
use crate::session::{SessionCommand, WriteError};

/// Messages accepted by the controller inbox. Machine inputs and control
/// operations share the queue so arrival order is preserved.
pub enum ControllerMsg {
    Machine(Input),
    UpdateConfig(RespawnConfig),
    GetStatus { reply: oneshot::Sender<RespawnStatus> },
}

/// Observable controller status served by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespawnStatus {
    pub state: RespawnState,
    pub cycles: u32,
    pub breaker: CircuitBreaker,
    pub health: u8,
    pub config: RespawnConfig,
}

/// Dependencies handed to the controller task. Only ids, channels, and
/// closures: the controller never holds the session itself.
pub struct ControllerDeps {
    pub session_id: String,
    /// Loopback sender for timer firings and async effect results.
    pub self_tx: mpsc::Sender<ControllerMsg>,
    /// Session write path for injections.
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    /// Samples `(token count, output tail hash)` for quiescence checks.
    pub sample: Arc<dyn Fn() -> (u64, u64) + Send + Sync>,
    /// Recent terminal window for the arbiter.
    pub window: Arc<dyn Fn() -> String + Send + Sync>,
    /// Next open tracked todo (ralph-todo prompt selection).
    pub next_todo: Arc<dyn Fn() -> Option<String> + Send + Sync>,
    pub arbiter: Arc<Arbiter>,
    pub fanout: Arc<EventFanout>,
}

pub struct RespawnController;

impl RespawnController {
    /// Spawn the controller task. It runs until `shutdown` fires or the
    /// inbox closes.
    pub fn spawn(
        config: RespawnConfig,
        mut inbox: mpsc::Receiver<ControllerMsg>,
        deps: ControllerDeps,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut machine = Machine::new(config);
            let mut ai_cancel = CancellationToken::new();

            loop {
                let msg = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = inbox.recv() => msg,
                };
                match msg {
                    None => break,
                    Some(ControllerMsg::Machine(input)) => {
                        let effects = machine.on_event(input, epoch_ms());
                        execute(&machine, effects, &deps, &shutdown, &mut ai_cancel);
                    }
                    Some(ControllerMsg::UpdateConfig(config)) => {
                        machine.config = config;
                    }
                    Some(ControllerMsg::GetStatus { reply }) => {
                        let _ = reply.send(status_of(&machine));
                    }
                }
            }
            ai_cancel.cancel();
        })
    }
}

fn status_of(machine: &Machine) -> RespawnStatus {
    RespawnStatus {
        state: machine.state(),
        cycles: machine.cycles(),
        breaker: *machine.breaker(),
        health: health_score(machine.state(), machine.breaker().state, machine.stats()),
        config: machine.config.clone(),
    }
}

fn execute(
    machine: &Machine,
    effects: Vec<Effect>,
    deps: &ControllerDeps,
    shutdown: &CancellationToken,
    ai_cancel: &mut CancellationToken,
) {
    for effect in effects {
        match effect {
            Effect::StartTimer { kind, after_ms, generation } => {
                spawn_timer(kind, after_ms, generation, deps, shutdown);
            }
            Effect::CancelAiCheck => {
                ai_cancel.cancel();
                *ai_cancel = CancellationToken::new();
            }
            Effect::RequestAiCheck => {
                spawn_ai_check(deps, shutdown, ai_cancel.clone());
            }
            Effect::Inject => {
                spawn_inject(machine, deps);
            }
            Effect::Emit(emission) => {
                deps.fanout.publish(emission_envelope(&deps.session_id, emission));
            }
        }
    }
}

fn spawn_timer(
    kind: TimerKind,
    after_ms: u64,
    generation: u64,
    deps: &ControllerDeps,
    shutdown: &CancellationToken,
) {
    let self_tx = deps.self_tx.clone();
    let sample = Arc::clone(&deps.sample);
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(after_ms)) => {
                let (tokens, tail_hash) = sample();
                let _ = self_tx
                    .send(ControllerMsg::Machine(Input::TimerFired {
                        generation,
                        kind,
                        tokens,
                        tail_hash,
                    }))
                    .await;
            }
        }
    });
}

fn spawn_ai_check(deps: &ControllerDeps, shutdown: &CancellationToken, cancel: CancellationToken) {
    let self_tx = deps.self_tx.clone();
    let arbiter = Arc::clone(&deps.arbiter);
    let window = (deps.window)();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = arbiter.check(&window, epoch_ms(), &cancel) => result,
        };
        let input = match result {
            Ok(judgement) => {
                debug!(
                    verdict = ?judgement.verdict,
                    duration_ms = judgement.duration_ms,
                    "arbiter verdict"
                );
                match judgement.verdict {
                    Verdict::Idle => VerdictInput::Idle,
                    Verdict::Working => VerdictInput::Working,
                    Verdict::Error => VerdictInput::Error,
                }
            }
            Err(CheckFailure::Cancelled) => return,
            Err(CheckFailure::TimedOut) => VerdictInput::TimedOut,
            Err(CheckFailure::Disabled) => VerdictInput::Disabled,
            Err(e) => {
                debug!("arbiter check failed: {e:?}");
                VerdictInput::Error
            }
        };
        let _ = self_tx.send(ControllerMsg::Machine(Input::Verdict(input))).await;
    });
}

fn spawn_inject(machine: &Machine, deps: &ControllerDeps) {
    let prompt = if machine.config.ralph_todo_mode {
        (deps.next_todo)().unwrap_or_else(|| machine.config.prompt.clone())
    } else {
        machine.config.prompt.clone()
    };

    let cmd_tx = deps.cmd_tx.clone();
    let self_tx = deps.self_tx.clone();
    let session_id = deps.session_id.clone();
    tokio::spawn(async move {
        let (reply_tx, reply_rx) = oneshot::channel();
        if cmd_tx.send(SessionCommand::WriteViaMux { text: prompt, reply: reply_tx }).await.is_err()
        {
            let _ = self_tx
                .send(ControllerMsg::Machine(Input::InjectResult { session_gone: true }))
                .await;
            return;
        }
        let session_gone = match reply_rx.await {
            Ok(Ok(())) => false,
            Ok(Err(WriteError::SessionGone)) | Err(_) => true,
            Ok(Err(e)) => {
                warn!(session = %session_id, "injection rejected: {e:?}");
                false
            }
        };
        let _ = self_tx
            .send(ControllerMsg::Machine(Input::InjectResult { session_gone }))
            .await;
    });
}

fn emission_envelope(session_id: &str, emission: Emission) -> Envelope {
    match emission {
        Emission::StateChanged { from, to, reason } => Envelope::new(
            names::RESPAWN_STATE_CHANGED,
            serde_json::json!({
                "sessionId": session_id,
                "from": from.as_str(),
                "to": to.as_str(),
                "reason": reason,
            }),
        ),
        Emission::CycleStarted { cycle } => Envelope::new(
            names::RESPAWN_CYCLE_STARTED,
            serde_json::json!({ "sessionId": session_id, "cycle": cycle }),
        ),
        Emission::Blocked { reason } => Envelope::new(
            names::RESPAWN_BLOCKED,
            serde_json::json!({ "sessionId": session_id, "reason": reason }),
        ),
        Emission::ExitGateMet => Envelope::new(
            names::RESPAWN_EXIT_GATE,
            serde_json::json!({ "sessionId": session_id }),
        ),
        Emission::BreakerChanged { breaker } => Envelope::new(
            names::RESPAWN_BREAKER,
            serde_json::json!({
                "sessionId": session_id,
                "state": breaker.state,
                "reason": breaker.reason.map(|r| r.as_str()),
                "consecutiveNoProgress": breaker.consecutive_no_progress,
            }),
        ),
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
