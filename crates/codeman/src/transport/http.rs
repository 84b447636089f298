// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers for the control channel.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::clock::epoch_ms;
use crate::error::ErrorCode;
use crate::respawn::controller::ControllerMsg;
use crate::respawn::machine::Input;
use crate::respawn::RespawnConfig;
use crate::session::{RalphOp, SessionCommand};
use crate::supervisor::HookRecord;

use super::{error_response, validate, ApiState};

pub async fn health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptimeMs": epoch_ms().saturating_sub(state.supervisor.started_at_ms),
    }))
}

/// `/status` is served from a 1 s snapshot cache; `session:*` / `respawn:*`
/// events invalidate it.
pub async fn status(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let supervisor = Arc::clone(&state.supervisor);
    let value = state.supervisor.fanout.status_cache.get_or_compute(move || {
        let sessions: Vec<_> = supervisor.sessions().iter().map(|s| s.info()).collect();
        json!({
            "sessions": sessions,
            "scheduled": supervisor.scheduled_runs(),
            "stats": {
                "startedAtMs": supervisor.started_at_ms,
                "sessionCount": sessions.len(),
                "clients": supervisor.fanout.client_count(),
            },
        })
    });
    Json(value)
}

pub async fn list_sessions(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let supervisor = Arc::clone(&state.supervisor);
    let value = state.supervisor.fanout.sessions_cache.get_or_compute(move || {
        let sessions: Vec<_> = supervisor.sessions().iter().map(|s| s.info()).collect();
        json!({ "sessions": sessions })
    });
    Json(value)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub working_dir: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

pub async fn create_session(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateSessionBody>,
) -> Response {
    let working_dir = match validate::working_dir(&body.working_dir, state.workdir_allow.as_ref())
    {
        Ok(dir) => dir,
        Err(msg) => return error_response(ErrorCode::BadRequest, msg),
    };
    if let Some(ref mode) = body.mode {
        if mode != "normal" && mode != "ralph" {
            return error_response(ErrorCode::BadRequest, format!("unknown mode {mode:?}"));
        }
    }
    let env = match validate::env_overrides(&body.env) {
        Ok(env) => env,
        Err(msg) => return error_response(ErrorCode::BadRequest, msg),
    };

    match state
        .supervisor
        .create_session_with_env(working_dir, body.name, body.mode.as_deref(), env)
        .await
    {
        Ok(handle) => (StatusCode::CREATED, Json(json!({ "session": handle.info() })))
            .into_response(),
        Err(e) => error_response(ErrorCode::MuxUnavailable, format!("{e:#}")),
    }
}

pub async fn get_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    match state.supervisor.get(&id) {
        Some(handle) => Json(json!({
            "session": handle.info(),
            "messages": handle.recent_messages(50),
        }))
        .into_response(),
        None => error_response(ErrorCode::SessionNotFound, format!("no session {id}")),
    }
}

pub async fn delete_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    match state.supervisor.delete_session(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot delete session {id}")),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendInputBody {
    pub text: String,
    /// Raw keystrokes go straight to the PTY; the default path types the
    /// text and presses Enter through the multiplexer.
    #[serde(default)]
    pub raw: bool,
}

pub async fn send_input(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<SendInputBody>,
) -> Response {
    let Some(handle) = state.supervisor.get(&id) else {
        return error_response(ErrorCode::SessionNotFound, format!("no session {id}"));
    };

    if body.raw {
        let sent = handle
            .send_command(SessionCommand::WriteRaw(Bytes::from(body.text.into_bytes())))
            .await;
        return match sent {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(_) => error_response(ErrorCode::SessionStopped, "session task is gone"),
        };
    }

    if let Err(msg) = validate::single_line(&body.text) {
        return error_response(ErrorCode::BadRequest, msg);
    }
    match handle.write_via_mux(body.text).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(crate::session::WriteError::SessionGone) => {
            error_response(ErrorCode::SessionGone, "multiplexer session is gone")
        }
        Err(crate::session::WriteError::MultiLine) => {
            error_response(ErrorCode::BadRequest, "input must be a single line")
        }
        Err(crate::session::WriteError::Closed) => {
            error_response(ErrorCode::SessionStopped, "session task is gone")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResizeBody {
    pub cols: u64,
    pub rows: u64,
}

pub async fn resize(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<ResizeBody>,
) -> Response {
    let cols = match validate::in_range("cols", body.cols, 10, 500) {
        Ok(v) => v as u16,
        Err(msg) => return error_response(ErrorCode::BadRequest, msg),
    };
    let rows = match validate::in_range("rows", body.rows, 5, 200) {
        Ok(v) => v as u16,
        Err(msg) => return error_response(ErrorCode::BadRequest, msg),
    };
    let Some(handle) = state.supervisor.get(&id) else {
        return error_response(ErrorCode::SessionNotFound, format!("no session {id}"));
    };
    match handle.send_command(SessionCommand::Resize { cols, rows }).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => error_response(ErrorCode::SessionStopped, "session task is gone"),
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputQuery {
    #[serde(default)]
    pub offset: u64,
}

/// Raw output replay from a global byte offset (reconnect recovery).
pub async fn output(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<OutputQuery>,
) -> Response {
    let Some(handle) = state.supervisor.get(&id) else {
        return error_response(ErrorCode::SessionNotFound, format!("no session {id}"));
    };
    match handle.read_raw_from(query.offset) {
        Some((total, bytes)) => {
            use base64::Engine;
            Json(json!({
                "offset": query.offset,
                "totalWritten": total,
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            }))
            .into_response()
        }
        None => Json(json!({
            "offset": query.offset,
            "totalWritten": handle.raw_total_written(),
            "resync": true,
        }))
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScreenQuery {
    #[serde(default = "default_screen_lines")]
    pub lines: u32,
}

fn default_screen_lines() -> u32 {
    50
}

/// Current pane content straight from the multiplexer (survives supervisor
/// restarts, unlike the in-memory buffers).
pub async fn screen(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<ScreenQuery>,
) -> Response {
    let Some(handle) = state.supervisor.get(&id) else {
        return error_response(ErrorCode::SessionNotFound, format!("no session {id}"));
    };
    let lines = match validate::in_range("lines", query.lines as u64, 1, 10_000) {
        Ok(v) => v as u32,
        Err(msg) => return error_response(ErrorCode::BadRequest, msg),
    };
    match state.supervisor.mux.capture_pane(&handle.mux_name, lines).await {
        Ok(bytes) => Json(json!({
            "sessionId": id,
            "screen": String::from_utf8_lossy(&bytes),
        }))
        .into_response(),
        Err(e) if e.is_session_gone() => {
            error_response(ErrorCode::SessionGone, "multiplexer session is gone")
        }
        Err(e) => error_response(ErrorCode::MuxUnavailable, format!("{e}")),
    }
}

pub async fn respawn_start(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    match state.supervisor.respawn_start(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot start respawn for {id}")),
    }
}

pub async fn respawn_stop(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.supervisor.respawn_stop(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot stop respawn for {id}")),
    }
}

pub async fn respawn_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    match state.supervisor.respawn_status(&id).await {
        Ok(status) => Json(json!({ "respawn": status })).into_response(),
        Err(code) => error_response(code, format!("no respawn status for {id}")),
    }
}

pub async fn respawn_update_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(config): Json<RespawnConfig>,
) -> Response {
    if let Err(msg) = validate::single_line(&config.prompt) {
        return error_response(ErrorCode::BadRequest, msg);
    }
    if let Err(msg) = validate::in_range("idleTimeoutMs", config.idle_timeout_ms, 1_000, 3_600_000)
    {
        return error_response(ErrorCode::BadRequest, msg);
    }
    match state.supervisor.respawn_update_config(&id, config).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot update respawn config for {id}")),
    }
}

pub async fn respawn_reset_breaker(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    match state
        .supervisor
        .send_controller(&id, ControllerMsg::Machine(Input::ManualReset))
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot reset breaker for {id}")),
    }
}

pub async fn ralph_state(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.supervisor.ralph_snapshot(&id).await {
        Ok(snapshot) => Json(json!({ "ralph": snapshot })).into_response(),
        Err(code) => error_response(code, format!("no ralph state for {id}")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RalphConfigBody {
    #[serde(default)]
    pub completion_phrase: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

pub async fn ralph_configure(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<RalphConfigBody>,
) -> Response {
    if let Some(ref phrase) = body.completion_phrase {
        if let Err(msg) = validate::single_line(phrase) {
            return error_response(ErrorCode::BadRequest, msg);
        }
    }
    if let Some(max) = body.max_iterations {
        if let Err(msg) = validate::in_range("maxIterations", max as u64, 1, 10_000) {
            return error_response(ErrorCode::BadRequest, msg);
        }
    }
    let op = RalphOp::Configure {
        completion_phrase: body.completion_phrase,
        max_iterations: body.max_iterations,
    };
    match state.supervisor.ralph_op(&id, op).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot configure ralph for {id}")),
    }
}

#[derive(Debug, Deserialize)]
pub struct PhraseBody {
    pub phrase: String,
}

pub async fn ralph_add_phrase(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<PhraseBody>,
) -> Response {
    if let Err(msg) = validate::single_line(&body.phrase) {
        return error_response(ErrorCode::BadRequest, msg);
    }
    match state.supervisor.ralph_op(&id, RalphOp::AddAlternatePhrase(body.phrase)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot add phrase for {id}")),
    }
}

pub async fn ralph_remove_phrase(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<PhraseBody>,
) -> Response {
    match state.supervisor.ralph_op(&id, RalphOp::RemoveAlternatePhrase(body.phrase)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, format!("cannot remove phrase for {id}")),
    }
}

pub async fn list_scheduled(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({ "scheduled": state.supervisor.scheduled_runs() }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduledBody {
    pub prompt: String,
    pub working_dir: String,
    pub duration_minutes: u64,
}

pub async fn create_scheduled(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateScheduledBody>,
) -> Response {
    if let Err(msg) = validate::single_line(&body.prompt) {
        return error_response(ErrorCode::BadRequest, msg);
    }
    let working_dir = match validate::working_dir(&body.working_dir, state.workdir_allow.as_ref())
    {
        Ok(dir) => dir,
        Err(msg) => return error_response(ErrorCode::BadRequest, msg),
    };
    // One week cap on scheduled runs.
    let minutes = match validate::in_range("durationMinutes", body.duration_minutes, 1, 10_080) {
        Ok(v) => v,
        Err(msg) => return error_response(ErrorCode::BadRequest, msg),
    };
    match state.supervisor.create_scheduled(body.prompt, working_dir, minutes).await {
        Ok(run) => (StatusCode::CREATED, Json(json!({ "run": run }))).into_response(),
        Err(e) => error_response(ErrorCode::MuxUnavailable, format!("{e:#}")),
    }
}

pub async fn get_scheduled(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    match state.supervisor.get_scheduled(&id) {
        Some(run) => Json(json!({ "run": run })).into_response(),
        None => error_response(ErrorCode::SessionNotFound, format!("no scheduled run {id}")),
    }
}

pub async fn stop_scheduled(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Response {
    if state.supervisor.stop_scheduled(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(ErrorCode::SessionNotFound, format!("no active scheduled run {id}"))
    }
}

pub async fn hook_event(
    State(state): State<Arc<ApiState>>,
    Json(record): Json<HookRecord>,
) -> Response {
    match state.supervisor.ingest_hook(record).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => error_response(code, "unknown hook session"),
    }
}
