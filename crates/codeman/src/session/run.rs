// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session task: the `tokio::select!` loop pumping PTY output through the
//! buffers, the busy/idle detector, the Ralph tracker, and the fanout.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ansi::AnsiStripper;
use crate::arbiter::Arbiter;
use crate::cleanup::CleanupManager;
use crate::clock::epoch_ms;
use crate::event::{names, Envelope};
use crate::fanout::EventFanout;
use crate::mux::{self, Multiplexer};
use crate::pty::{shutdown_child, PtyInput, PtyProcess};
use crate::respawn::controller::{ControllerDeps, ControllerMsg, RespawnController};
use crate::respawn::machine::Input;
use crate::respawn::RespawnConfig;
use crate::store::StateStore;
use crate::tracker::planfile::{PlanFileWatcher, PlanUpdate};
use crate::tracker::{RalphTracker, TrackerEvent};

use super::detect::{classify_chunk, ActivitySignal};
use super::{
    RalphOp, SessionCommand, SessionHandle, SessionStatus, WriteError, ARBITER_WINDOW,
    PROBABLY_IDLE_MS, WRITE_ENTER_DELAY_MS,
};

/// Everything needed to bring one session up.
pub struct SessionSpawn {
    pub id: String,
    pub name: Option<String>,
    pub working_dir: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub mux: Arc<dyn Multiplexer>,
    pub fanout: Arc<EventFanout>,
    pub store: Arc<StateStore>,
    pub respawn_config: RespawnConfig,
    pub arbiter_command: String,
    /// Supervisor-level shutdown; the session derives a child token.
    pub shutdown: CancellationToken,
}

/// Attach a PTY to the session's multiplexer window and start the session
/// task, tracker, and respawn controller.
///
/// The multiplexer session itself must already exist (created fresh or
/// adopted at startup).
pub async fn spawn_session(spawn: SessionSpawn) -> anyhow::Result<Arc<SessionHandle>> {
    let mux_name = mux::session_name(&spawn.id);
    let attach = spawn.mux.attach_command(&mux_name);
    let pty = PtyProcess::spawn(&attach, spawn.cols, spawn.rows, &[])?;
    let pid = pty.child_pid();

    let (pty_out_tx, pty_out_rx) = mpsc::channel(256);
    let (pty_in_tx, pty_in_rx) = mpsc::channel::<PtyInput>(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (respawn_tx, respawn_rx) = mpsc::channel(256);
    let (plan_tx, plan_rx) = mpsc::channel(8);

    let cleanup = CleanupManager::child_of(&spawn.shutdown);
    let handle = Arc::new(SessionHandle::new(
        spawn.id.clone(),
        spawn.name.clone(),
        mux_name,
        spawn.working_dir.clone(),
        epoch_ms(),
        pid,
        cmd_tx,
        respawn_tx.clone(),
        cleanup,
    ));

    // PTY pump task.
    handle.cleanup.register(tokio::spawn(async move {
        match pty.run(pty_out_tx, pty_in_rx).await {
            Ok(status) => debug!(?status, "pty attach exited"),
            Err(e) => warn!("pty attach failed: {e:#}"),
        }
    }));

    // Authoritative plan-file watcher.
    let watcher = PlanFileWatcher::new(&spawn.working_dir);
    handle
        .cleanup
        .register(tokio::spawn(watcher.run(plan_tx, epoch_ms, handle.cleanup.token())));

    // Respawn controller with its sampling closures.
    let arbiter = Arc::new(Arbiter::new(
        spawn.arbiter_command,
        Duration::from_millis(spawn.respawn_config.ai_check_timeout_ms),
        Duration::from_millis(spawn.respawn_config.ai_check_cooldown_ms),
    ));
    let sample = {
        let handle = Arc::clone(&handle);
        Arc::new(move || (handle.tokens(), handle.tail_hash()))
            as Arc<dyn Fn() -> (u64, u64) + Send + Sync>
    };
    let window = {
        let handle = Arc::clone(&handle);
        Arc::new(move || handle.text_tail(ARBITER_WINDOW)) as Arc<dyn Fn() -> String + Send + Sync>
    };
    let next_todo = {
        let handle = Arc::clone(&handle);
        Arc::new(move || handle.next_todo()) as Arc<dyn Fn() -> Option<String> + Send + Sync>
    };
    let controller = RespawnController::spawn(
        spawn.respawn_config,
        respawn_rx,
        ControllerDeps {
            session_id: spawn.id.clone(),
            self_tx: respawn_tx.clone(),
            cmd_tx: handle.cmd_tx(),
            sample,
            window,
            next_todo,
            arbiter,
            fanout: Arc::clone(&spawn.fanout),
        },
        handle.cleanup.token(),
    );
    handle.cleanup.register(controller);

    // Session select-loop task.
    let runtime = SessionRuntime {
        handle: Arc::clone(&handle),
        tracker: RalphTracker::new()?,
        stripper: AnsiStripper::new(),
        mux: Arc::clone(&spawn.mux),
        fanout: Arc::clone(&spawn.fanout),
        store: Arc::clone(&spawn.store),
        pty_in_tx,
        respawn_tx,
    };
    handle.cleanup.register(tokio::spawn(runtime.run(pty_out_rx, cmd_rx, plan_rx)));

    info!(session = %spawn.id, pid, "session attached");
    Ok(handle)
}

struct SessionRuntime {
    handle: Arc<SessionHandle>,
    tracker: RalphTracker,
    stripper: AnsiStripper,
    mux: Arc<dyn Multiplexer>,
    fanout: Arc<EventFanout>,
    store: Arc<StateStore>,
    pty_in_tx: mpsc::Sender<PtyInput>,
    respawn_tx: mpsc::Sender<ControllerMsg>,
}

impl SessionRuntime {
    async fn run(
        mut self,
        mut output_rx: mpsc::Receiver<Bytes>,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut plan_rx: mpsc::Receiver<PlanUpdate>,
    ) {
        let token = self.handle.cleanup.token();
        let mut tick = tokio::time::interval(Duration::from_millis(50));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut idle_deadline: Option<tokio::time::Instant> = None;
        let mut pty_open = true;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,

                chunk = output_rx.recv(), if pty_open => {
                    match chunk {
                        Some(bytes) => self.on_output(&bytes, &mut idle_deadline).await,
                        None => {
                            pty_open = false;
                            self.on_pty_closed().await;
                        }
                    }
                }

                command = cmd_rx.recv() => {
                    match command {
                        Some(command) => self.on_command(command).await,
                        None => break,
                    }
                }

                update = plan_rx.recv() => {
                    if let Some(update) = update {
                        self.tracker.set_plan_todos(update.todos);
                        let events = self.tracker.flush_pending_events();
                        self.route(events).await;
                    }
                }

                // Probably-idle timer armed by the prompt glyph.
                _ = async {
                    match idle_deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                }, if idle_deadline.is_some() => {
                    idle_deadline = None;
                    self.on_probably_idle().await;
                }

                // Debounce/sweep tick for the tracker.
                _ = tick.tick() => {
                    let events = self.tracker.poll(epoch_ms());
                    self.route(events).await;
                }
            }
        }

        // Shutdown: flush the tracker so no debounced emission is lost.
        let events = self.tracker.flush_pending_events();
        self.route(events).await;
        self.fanout.flush_session(&self.handle.id);
        if let Some(pid) = self.handle.pid() {
            shutdown_child(pid).await;
        }
    }

    async fn on_output(&mut self, bytes: &[u8], idle_deadline: &mut Option<tokio::time::Instant>) {
        let now = epoch_ms();
        self.handle.last_activity_ms.store(now, Ordering::Relaxed);
        self.handle.append_raw(bytes);
        self.fanout.push_terminal(&self.handle.id, bytes);

        let text = self.stripper.push(bytes);
        if text.is_empty() {
            return;
        }
        self.handle.append_text(&text);

        match classify_chunk(&text) {
            ActivitySignal::Working => {
                *idle_deadline = None;
                if self.handle.set_status(SessionStatus::Busy) {
                    self.status_changed(SessionStatus::Busy).await;
                }
                self.notify(Input::Working).await;
            }
            ActivitySignal::PromptGlyph => {
                *idle_deadline = Some(
                    tokio::time::Instant::now() + Duration::from_millis(PROBABLY_IDLE_MS),
                );
            }
            ActivitySignal::Activity => {
                *idle_deadline = None;
            }
            ActivitySignal::Quiet => {}
        }

        self.notify(Input::Output {
            tokens: self.handle.tokens(),
            tail_hash: self.handle.tail_hash(),
        })
        .await;

        let events = self.tracker.feed(&text, now);
        self.route(events).await;
    }

    async fn on_probably_idle(&mut self) {
        if self.handle.set_status(SessionStatus::Idle) {
            self.status_changed(SessionStatus::Idle).await;
        }
        self.notify(Input::Idle {
            tokens: self.handle.tokens(),
            tail_hash: self.handle.tail_hash(),
        })
        .await;
    }

    async fn on_pty_closed(&mut self) {
        // The attach process died. The durable session may survive in the
        // multiplexer; this PTY session is done either way.
        if self.handle.set_status(SessionStatus::Stopped) {
            self.status_changed(SessionStatus::Stopped).await;
        }
        self.notify(Input::SessionStopped).await;
    }

    async fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::WriteRaw(bytes) => {
                let _ = self.pty_in_tx.send(PtyInput::Write(bytes)).await;
            }
            SessionCommand::Resize { cols, rows } => {
                let _ = self.pty_in_tx.send(PtyInput::Resize { cols, rows }).await;
            }
            SessionCommand::WriteViaMux { text, reply } => {
                let result = self.write_via_mux(&text).await;
                let _ = reply.send(result);
            }
            SessionCommand::Ralph(op) => {
                // Flush before any cross-cutting read or reconfiguration.
                let events = self.tracker.flush_pending_events();
                self.route(events).await;
                match op {
                    RalphOp::Snapshot { reply } => {
                        let _ = reply.send(self.tracker.snapshot());
                    }
                    RalphOp::Configure { completion_phrase, max_iterations } => {
                        self.tracker.configure(completion_phrase, max_iterations);
                        self.tracker.set_enabled(true);
                    }
                    RalphOp::AddAlternatePhrase(phrase) => {
                        self.tracker.add_alternate_phrase(phrase);
                    }
                    RalphOp::RemoveAlternatePhrase(phrase) => {
                        self.tracker.remove_alternate_phrase(&phrase);
                    }
                    RalphOp::SoftReset => {
                        self.tracker.soft_reset();
                    }
                }
                let events = self.tracker.flush_pending_events();
                self.route(events).await;
            }
            SessionCommand::Stop { reply } => {
                if let Some(pid) = self.handle.pid() {
                    shutdown_child(pid).await;
                }
                if self.handle.set_status(SessionStatus::Stopped) {
                    self.status_changed(SessionStatus::Stopped).await;
                }
                self.notify(Input::SessionStopped).await;
                let events = self.tracker.flush_pending_events();
                self.route(events).await;
                let _ = reply.send(());
            }
        }
    }

    /// The programmatic write contract: literal text, a brief delay, then
    /// Enter as a separate keystroke. Single-line only.
    async fn write_via_mux(&mut self, text: &str) -> Result<(), WriteError> {
        if text.contains('\n') || text.contains('\r') {
            return Err(WriteError::MultiLine);
        }
        let name = self.handle.mux_name.clone();

        if let Err(e) = self.mux.send_literal_text(&name, text).await {
            return self.mux_write_failed(e).await;
        }
        tokio::time::sleep(Duration::from_millis(WRITE_ENTER_DELAY_MS)).await;
        if let Err(e) = self.mux.send_enter(&name).await {
            return self.mux_write_failed(e).await;
        }
        Ok(())
    }

    async fn mux_write_failed(&mut self, error: crate::mux::MuxError) -> Result<(), WriteError> {
        if error.is_session_gone() {
            warn!(session = %self.handle.id, "multiplexer session gone");
            if self.handle.set_status(SessionStatus::Stopped) {
                self.status_changed(SessionStatus::Stopped).await;
            }
            return Err(WriteError::SessionGone);
        }
        // Transient multiplexer hiccup: log and keep the session alive.
        warn!(session = %self.handle.id, "mux write failed: {error}");
        Ok(())
    }

    async fn status_changed(&self, status: SessionStatus) {
        self.fanout.publish(Envelope::new(
            names::SESSION_STATUS,
            serde_json::json!({ "sessionId": self.handle.id, "status": status }),
        ));
        let id = self.handle.id.clone();
        let last_activity = self.handle.last_activity_ms.load(Ordering::Relaxed);
        self.store.update(move |state| {
            if let Some(entry) = state.sessions.get_mut(&id) {
                entry.status = status;
                entry.last_activity_at_ms = last_activity;
            }
        });
    }

    async fn notify(&self, input: Input) {
        let _ = self.respawn_tx.send(ControllerMsg::Machine(input)).await;
    }

    async fn route(&mut self, events: Vec<TrackerEvent>) {
        for event in events {
            match event {
                TrackerEvent::Enabled => {
                    self.fanout.publish(Envelope::new(
                        names::RALPH_LOOP,
                        serde_json::json!({ "sessionId": self.handle.id, "enabled": true }),
                    ));
                }
                TrackerEvent::LoopUpdate(loop_state) => {
                    self.handle.push_message(
                        serde_json::json!({ "type": "loopUpdate", "loop": loop_state }),
                    );
                    let id = self.handle.id.clone();
                    let persisted = crate::store::PersistedLoop {
                        enabled: loop_state.enabled,
                        cycles: loop_state.cycles,
                        completion_phrase: loop_state.completion_phrase.clone(),
                        alternate_phrases: loop_state.alternate_phrases.clone(),
                    };
                    self.store.update(move |state| {
                        state.ralph_loop.insert(id, persisted);
                    });
                    self.fanout.publish(Envelope::new(
                        names::RALPH_LOOP,
                        serde_json::json!({ "sessionId": self.handle.id, "loop": loop_state }),
                    ));
                }
                TrackerEvent::TodoUpdate(todos) => {
                    let next = todos
                        .iter()
                        .find(|t| t.status != crate::tracker::todo::TodoStatus::Completed)
                        .map(|t| t.content.clone());
                    self.handle.set_next_todo(next);
                    self.handle
                        .push_message(serde_json::json!({ "type": "todoUpdate", "todos": todos }));
                    self.fanout.publish(Envelope::new(
                        names::RALPH_TODOS,
                        serde_json::json!({ "sessionId": self.handle.id, "todos": todos }),
                    ));
                }
                TrackerEvent::CompletionDetected { phrase } => {
                    self.handle.push_message(
                        serde_json::json!({ "type": "completion", "phrase": phrase }),
                    );
                    self.fanout.publish(Envelope::new(
                        names::RALPH_COMPLETION,
                        serde_json::json!({ "sessionId": self.handle.id, "phrase": phrase }),
                    ));
                    self.notify(Input::CompletionDetected).await;
                }
                TrackerEvent::StatusBlockDetected(block) => {
                    self.handle.push_message(
                        serde_json::json!({ "type": "statusBlock", "block": block }),
                    );
                    self.fanout.publish(Envelope::new(
                        names::RALPH_STATUS_BLOCK,
                        serde_json::json!({ "sessionId": self.handle.id, "block": block }),
                    ));
                    self.notify(Input::StatusBlock(block)).await;
                }
                TrackerEvent::CompletionIndicator { .. } => {
                    self.notify(Input::CompletionIndicator).await;
                }
                TrackerEvent::PhraseValidationWarning { phrase, suggestion } => {
                    self.fanout.publish(Envelope::new(
                        names::RALPH_PHRASE_WARNING,
                        serde_json::json!({
                            "sessionId": self.handle.id,
                            "phrase": phrase,
                            "suggestion": suggestion,
                        }),
                    ));
                }
                TrackerEvent::StallWarning { inactive_ms } => {
                    self.fanout.publish(Envelope::new(
                        names::RALPH_STALL,
                        serde_json::json!({
                            "sessionId": self.handle.id,
                            "inactiveMs": inactive_ms,
                        }),
                    ));
                }
            }
        }
    }
}
