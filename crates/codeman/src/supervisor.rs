// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor: wires the store, multiplexer, sessions, controllers, and
//! fanout together, and owns the scheduled-run deadline timers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::cleanup::CleanupManager;
use crate::clock::epoch_ms;
use crate::config::Config;
use crate::error::ErrorCode;
use crate::event::{names, Envelope};
use crate::fanout::EventFanout;
use crate::mux::{self, Multiplexer};
use crate::respawn::controller::{ControllerMsg, RespawnStatus};
use crate::respawn::machine::Input;
use crate::respawn::RespawnConfig;
use crate::sched::ScheduledRun;
use crate::session::{
    spawn_session, SessionCommand, SessionHandle, SessionSpawn, SessionStatus,
};
use crate::store::{PersistedSession, PersistedTask, StateStore};
use crate::tracker::RalphSnapshot;

/// Hook record ingested from the agent's lifecycle hooks (loopback only).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRecord {
    pub session_id: String,
    pub event: String,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
}

pub struct Supervisor {
    pub config: Config,
    pub mux: Arc<dyn Multiplexer>,
    pub store: Arc<StateStore>,
    pub fanout: Arc<EventFanout>,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    scheduled: Mutex<HashMap<String, ScheduledRun>>,
    pub cleanup: CleanupManager,
    pub started_at_ms: u64,
}

impl Supervisor {
    /// Bring the supervisor up: detect the multiplexer backend, load the
    /// persisted state, start the store writer, and adopt survivors.
    pub async fn start(config: Config) -> anyhow::Result<Arc<Self>> {
        let mux = mux::detect(&config.mux)?;
        let store = StateStore::load(config.state_path());
        let fanout = EventFanout::new();
        let cleanup = CleanupManager::new();

        cleanup.register(tokio::spawn(Arc::clone(&store).run(cleanup.token())));

        let supervisor = Arc::new(Self {
            config,
            mux,
            store,
            fanout,
            sessions: RwLock::new(HashMap::new()),
            scheduled: Mutex::new(HashMap::new()),
            cleanup,
            started_at_ms: epoch_ms(),
        });

        supervisor.adopt_surviving_sessions().await;
        Ok(supervisor)
    }

    /// Discovery at startup: adopt `codeman-*` sessions still referenced by
    /// the state document; kill orphans (no entry, or entry says stopped).
    async fn adopt_surviving_sessions(self: &Arc<Self>) {
        let names = match self.mux.list().await {
            Ok(names) => names,
            Err(e) => {
                warn!("multiplexer discovery failed: {e}");
                return;
            }
        };
        let persisted = self.store.snapshot();

        for name in names.into_iter().filter(|n| mux::is_owned_name(n)) {
            let entry = persisted.sessions.iter().find(|(id, snapshot)| {
                mux::session_name(id) == name && snapshot.status != SessionStatus::Stopped
            });

            match entry {
                Some((id, snapshot)) => {
                    let spawn = SessionSpawn {
                        id: id.clone(),
                        name: snapshot.name.clone(),
                        working_dir: snapshot.working_dir.clone(),
                        cols: self.config.cols,
                        rows: self.config.rows,
                        mux: Arc::clone(&self.mux),
                        fanout: Arc::clone(&self.fanout),
                        store: Arc::clone(&self.store),
                        respawn_config: snapshot.respawn.clone(),
                        arbiter_command: self.config.arbiter_agent().to_owned(),
                        shutdown: self.cleanup.token(),
                    };
                    match spawn_session(spawn).await {
                        Ok(handle) => {
                            info!(session = %id, mux = %name, "adopted surviving session");
                            self.sessions.write().insert(id.clone(), handle);
                            self.fanout.publish(Envelope::new(
                                names::MUX_ADOPTED,
                                json!({ "sessionId": id, "muxName": name }),
                            ));
                        }
                        Err(e) => warn!(session = %id, "failed to adopt session: {e:#}"),
                    }
                }
                None => {
                    info!(mux = %name, "killing orphan multiplexer session");
                    if let Err(e) = self.mux.kill(&name).await {
                        warn!(mux = %name, "orphan kill failed: {e}");
                    }
                    self.fanout.publish(Envelope::new(
                        names::MUX_ORPHAN_KILLED,
                        json!({ "muxName": name }),
                    ));
                }
            }
        }
    }

    /// Create a new session: a fresh multiplexer window running the agent,
    /// with a PTY session, tracker, and controller attached.
    pub async fn create_session(
        self: &Arc<Self>,
        working_dir: PathBuf,
        name: Option<String>,
        mode: Option<&str>,
    ) -> anyhow::Result<Arc<SessionHandle>> {
        self.create_session_with_env(working_dir, name, mode, Vec::new()).await
    }

    /// [`Supervisor::create_session`] with validated environment overrides
    /// for the agent process.
    pub async fn create_session_with_env(
        self: &Arc<Self>,
        working_dir: PathBuf,
        name: Option<String>,
        mode: Option<&str>,
        env: Vec<(String, String)>,
    ) -> anyhow::Result<Arc<SessionHandle>> {
        let id = uuid::Uuid::new_v4().to_string();
        let mux_name = mux::session_name(&id);

        let mut respawn_config = RespawnConfig {
            idle_timeout_ms: self.config.idle_timeout().as_millis() as u64,
            completion_confirm_ms: self.config.completion_confirm().as_millis() as u64,
            no_output_timeout_ms: self.config.no_output_timeout().as_millis() as u64,
            ai_idle_check: self.config.ai_idle_check,
            ai_check_timeout_ms: self.config.ai_check_timeout().as_millis() as u64,
            ai_check_cooldown_ms: self.config.ai_check_cooldown().as_millis() as u64,
            ..RespawnConfig::default()
        };
        if mode == Some("ralph") {
            respawn_config.enabled = true;
            respawn_config.ralph_todo_mode = true;
        }

        self.mux
            .create(
                &mux_name,
                &working_dir,
                &self.config.agent,
                self.config.cols,
                self.config.rows,
                &env,
            )
            .await?;

        let spawn = SessionSpawn {
            id: id.clone(),
            name: name.clone(),
            working_dir: working_dir.clone(),
            cols: self.config.cols,
            rows: self.config.rows,
            mux: Arc::clone(&self.mux),
            fanout: Arc::clone(&self.fanout),
            store: Arc::clone(&self.store),
            respawn_config: respawn_config.clone(),
            arbiter_command: self.config.arbiter_agent().to_owned(),
            shutdown: self.cleanup.token(),
        };
        let handle = match spawn_session(spawn).await {
            Ok(handle) => handle,
            Err(e) => {
                // Roll back the multiplexer window; a half-created session
                // would otherwise be adopted as a ghost on restart.
                let _ = self.mux.kill(&mux_name).await;
                return Err(e);
            }
        };

        self.sessions.write().insert(id.clone(), Arc::clone(&handle));

        let persisted = PersistedSession {
            status: handle.status(),
            working_dir,
            name,
            created_at_ms: handle.created_at_ms,
            last_activity_at_ms: handle.created_at_ms,
            tokens: 0,
            cost: 0.0,
            respawn: respawn_config,
        };
        let persist_id = id.clone();
        self.store.update(move |state| {
            state.sessions.insert(persist_id, persisted);
        });

        self.fanout
            .publish(Envelope::new(names::SESSION_CREATED, json!({ "session": handle.info() })));
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at_ms);
        sessions
    }

    /// Stop a session's subprocess; the handle stays addressable.
    pub async fn stop_session(&self, id: &str) -> Result<(), ErrorCode> {
        let handle = self.get(id).ok_or(ErrorCode::SessionNotFound)?;
        handle.stop().await;
        let persist_id = id.to_owned();
        self.store.update(move |state| {
            if let Some(entry) = state.sessions.get_mut(&persist_id) {
                entry.status = SessionStatus::Stopped;
            }
        });
        Ok(())
    }

    /// Delete a session: stop it, tear down the multiplexer window, drop
    /// the handle and its persisted entry.
    pub async fn delete_session(&self, id: &str) -> Result<(), ErrorCode> {
        let handle = self.get(id).ok_or(ErrorCode::SessionNotFound)?;
        handle.stop().await;
        if let Err(e) = self.mux.kill(&handle.mux_name).await {
            warn!(session = %id, "mux kill failed on delete: {e}");
        }
        self.sessions.write().remove(id);
        let persist_id = id.to_owned();
        self.store.update(move |state| {
            state.sessions.remove(&persist_id);
            state.ralph_loop.remove(&persist_id);
        });
        self.fanout
            .publish(Envelope::new(names::SESSION_DELETED, json!({ "sessionId": id })));
        Ok(())
    }

    pub async fn send_controller(&self, id: &str, msg: ControllerMsg) -> Result<(), ErrorCode> {
        let handle = self.get(id).ok_or(ErrorCode::SessionNotFound)?;
        handle.respawn_tx().send(msg).await.map_err(|_| ErrorCode::SessionStopped)
    }

    /// Enable respawn; if the session is already busy, synthesize the
    /// `working` signal so the controller leaves DORMANT immediately.
    pub async fn respawn_start(&self, id: &str) -> Result<(), ErrorCode> {
        self.send_controller(id, ControllerMsg::Machine(Input::Start)).await?;
        let handle = self.get(id).ok_or(ErrorCode::SessionNotFound)?;
        if handle.status() == SessionStatus::Busy {
            self.send_controller(id, ControllerMsg::Machine(Input::Working)).await?;
        }
        self.persist_respawn_enabled(id, true);
        Ok(())
    }

    pub async fn respawn_stop(&self, id: &str) -> Result<(), ErrorCode> {
        self.send_controller(id, ControllerMsg::Machine(Input::Stop)).await?;
        self.persist_respawn_enabled(id, false);
        Ok(())
    }

    fn persist_respawn_enabled(&self, id: &str, enabled: bool) {
        let persist_id = id.to_owned();
        self.store.update(move |state| {
            if let Some(entry) = state.sessions.get_mut(&persist_id) {
                entry.respawn.enabled = enabled;
            }
        });
    }

    pub async fn respawn_status(&self, id: &str) -> Result<RespawnStatus, ErrorCode> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.send_controller(id, ControllerMsg::GetStatus { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| ErrorCode::SessionStopped)
    }

    pub async fn respawn_update_config(
        &self,
        id: &str,
        config: RespawnConfig,
    ) -> Result<(), ErrorCode> {
        self.send_controller(id, ControllerMsg::UpdateConfig(config.clone())).await?;
        let persist_id = id.to_owned();
        self.store.update(move |state| {
            if let Some(entry) = state.sessions.get_mut(&persist_id) {
                entry.respawn = config;
            }
        });
        Ok(())
    }

    pub async fn ralph_snapshot(&self, id: &str) -> Result<RalphSnapshot, ErrorCode> {
        let handle = self.get(id).ok_or(ErrorCode::SessionNotFound)?;
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        handle
            .send_command(SessionCommand::Ralph(crate::session::RalphOp::Snapshot {
                reply: reply_tx,
            }))
            .await
            .map_err(|_| ErrorCode::SessionStopped)?;
        reply_rx.await.map_err(|_| ErrorCode::SessionStopped)
    }

    pub async fn ralph_op(&self, id: &str, op: crate::session::RalphOp) -> Result<(), ErrorCode> {
        let handle = self.get(id).ok_or(ErrorCode::SessionNotFound)?;
        handle.send_command(SessionCommand::Ralph(op)).await.map_err(|_| ErrorCode::SessionStopped)
    }

    /// Create a scheduled run: a fresh session kicked off with the prompt
    /// and stopped (not deleted) at the deadline.
    pub async fn create_scheduled(
        self: &Arc<Self>,
        prompt: String,
        working_dir: PathBuf,
        duration_minutes: u64,
    ) -> anyhow::Result<ScheduledRun> {
        let handle = self.create_session(working_dir, None, None).await?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let run = ScheduledRun::new(
            run_id.clone(),
            handle.id.clone(),
            prompt.clone(),
            epoch_ms(),
            duration_minutes,
        );

        handle.set_current_task_id(Some(run_id.clone()));
        self.scheduled.lock().insert(run_id.clone(), run.clone());
        let persisted = PersistedTask {
            session_id: run.session_id.clone(),
            prompt: prompt.clone(),
            started_at_ms: run.started_at_ms,
            duration_minutes,
            tasks_completed: 0,
            cost: 0.0,
            active: true,
        };
        let persist_id = run_id.clone();
        self.store.update(move |state| {
            state.tasks.insert(persist_id, persisted);
        });

        // Kick off after a short settle so the agent's line editor is up.
        let kick_handle = Arc::clone(&handle);
        let kick_prompt = prompt;
        self.cleanup.register(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            if let Err(e) = kick_handle.write_via_mux(kick_prompt).await {
                warn!(session = %kick_handle.id, "scheduled kick-off failed: {e:?}");
            }
        }));

        // Umbrella deadline timer.
        let supervisor = Arc::downgrade(self);
        let deadline_run_id = run_id.clone();
        let deadline = Duration::from_secs(duration_minutes * 60);
        let shutdown = self.cleanup.token();
        self.cleanup.register(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    if let Some(supervisor) = supervisor.upgrade() {
                        supervisor.stop_scheduled(&deadline_run_id).await;
                    }
                }
            }
        }));

        self.fanout.publish(Envelope::new(names::SCHED_STARTED, json!({ "run": run })));
        Ok(run)
    }

    pub fn scheduled_runs(&self) -> Vec<ScheduledRun> {
        let mut runs: Vec<_> = self.scheduled.lock().values().cloned().collect();
        runs.sort_by_key(|r| r.started_at_ms);
        runs
    }

    pub fn get_scheduled(&self, id: &str) -> Option<ScheduledRun> {
        self.scheduled.lock().get(id).cloned()
    }

    /// Stop a scheduled run: stops the underlying session, keeps both
    /// records.
    pub async fn stop_scheduled(&self, id: &str) -> bool {
        let run = {
            let mut scheduled = self.scheduled.lock();
            let Some(run) = scheduled.get_mut(id) else { return false };
            if !run.active {
                return false;
            }
            run.active = false;
            run.clone()
        };
        let _ = self.stop_session(&run.session_id).await;
        let persist_id = id.to_owned();
        self.store.update(move |state| {
            if let Some(task) = state.tasks.get_mut(&persist_id) {
                task.active = false;
            }
        });
        self.fanout.publish(Envelope::new(names::SCHED_STOPPED, json!({ "runId": id })));
        true
    }

    /// Ingest one hook record (loopback only; bypasses auth).
    pub async fn ingest_hook(&self, record: HookRecord) -> Result<(), ErrorCode> {
        let handle = self.get(&record.session_id).ok_or(ErrorCode::SessionNotFound)?;
        if let Some(tokens) = record.tokens {
            handle.add_tokens(tokens);
        }
        if let Some(cost) = record.cost {
            handle.add_cost(cost);
        }
        // Roll usage up into the umbrella scheduled run, when one owns this
        // session.
        if let Some(run_id) = handle.current_task_id() {
            let mut scheduled = self.scheduled.lock();
            if let Some(run) = scheduled.get_mut(&run_id) {
                if let Some(cost) = record.cost {
                    run.cost += cost;
                }
                if record.event == "TaskComplete" {
                    run.tasks_completed += 1;
                }
            }
        }
        // Turn lifecycle hooks double as busy/idle hints.
        match record.event.as_str() {
            "TurnStart" | "PreToolUse" => {
                if handle.set_status(SessionStatus::Busy) {
                    self.fanout.publish(Envelope::new(
                        names::SESSION_STATUS,
                        json!({ "sessionId": handle.id, "status": SessionStatus::Busy }),
                    ));
                }
                let _ = handle.respawn_tx().send(ControllerMsg::Machine(Input::Working)).await;
            }
            "Stop" | "TurnEnd" => {
                let _ = handle
                    .respawn_tx()
                    .send(ControllerMsg::Machine(Input::Idle {
                        tokens: handle.tokens(),
                        tail_hash: handle.tail_hash(),
                    }))
                    .await;
            }
            _ => {}
        }
        self.fanout.publish(Envelope::new(
            names::HOOK_EVENT,
            json!({ "sessionId": record.session_id, "event": record.event }),
        ));
        Ok(())
    }

    /// Authoritative snapshot for the SSE `init` event and `/status`.
    pub async fn snapshot_json(&self) -> serde_json::Value {
        let sessions: Vec<_> = self.sessions().iter().map(|s| s.info()).collect();
        let mut respawn = serde_json::Map::new();
        for session in self.sessions() {
            if let Ok(status) = self.respawn_status(&session.id).await {
                if let Ok(value) = serde_json::to_value(&status) {
                    respawn.insert(session.id.clone(), value);
                }
            }
        }
        json!({
            "sessions": sessions,
            "respawn": respawn,
            "scheduled": self.scheduled_runs(),
            "stats": {
                "startedAtMs": self.started_at_ms,
                "sessionCount": sessions.len(),
                "clients": self.fanout.client_count(),
            },
        })
    }

    /// Graceful disposal: stop sessions, flush the store, drop timers.
    pub async fn dispose(&self) {
        for session in self.sessions() {
            session.stop().await;
        }
        if let Err(e) = self.store.write_now() {
            warn!("final persist on dispose failed: {e}");
        }
        self.cleanup.dispose();
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
