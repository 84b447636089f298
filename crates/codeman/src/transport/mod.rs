// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-channel router and shared transport plumbing.

pub mod auth;
pub mod http;
pub mod sse;
pub mod validate;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use regex::Regex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ErrorCode;
use crate::event::ErrorResponse;
use crate::supervisor::Supervisor;

pub use auth::AuthState;

/// Shared state for all handlers.
pub struct ApiState {
    pub supervisor: Arc<Supervisor>,
    /// Present only when username/password auth is configured.
    pub auth: Option<AuthState>,
    /// Optional override for the working-directory allowlist.
    pub workdir_allow: Option<Regex>,
}

impl ApiState {
    pub fn new(supervisor: Arc<Supervisor>) -> anyhow::Result<Arc<Self>> {
        let auth = match (&supervisor.config.auth_user, &supervisor.config.auth_password) {
            (Some(user), Some(password)) => {
                Some(AuthState::new(user.clone(), password.clone()))
            }
            _ => None,
        };
        let workdir_allow = supervisor
            .config
            .workdir_allow
            .as_deref()
            .map(Regex::new)
            .transpose()?;
        Ok(Arc::new(Self { supervisor, auth, workdir_allow }))
    }
}

/// Build a structured error response: `{error: {code, message}}`.
pub fn error_response(code: ErrorCode, message: impl Into<String>) -> Response {
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse { error: code.to_error_body(message) };
    (status, Json(body)).into_response()
}

/// Build the axum router with all control and client channels.
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/status", get(http::status))
        .route("/api/v1/events", get(sse::events))
        .route("/api/v1/login", post(auth::login))
        .route("/api/v1/logout", post(auth::logout))
        .route("/api/v1/sessions", get(http::list_sessions).post(http::create_session))
        .route("/api/v1/sessions/{id}", get(http::get_session).delete(http::delete_session))
        .route("/api/v1/sessions/{id}/input", post(http::send_input))
        .route("/api/v1/sessions/{id}/resize", post(http::resize))
        .route("/api/v1/sessions/{id}/output", get(http::output))
        .route("/api/v1/sessions/{id}/screen", get(http::screen))
        .route("/api/v1/sessions/{id}/respawn/start", post(http::respawn_start))
        .route("/api/v1/sessions/{id}/respawn/stop", post(http::respawn_stop))
        .route(
            "/api/v1/sessions/{id}/respawn/config",
            get(http::respawn_config).put(http::respawn_update_config),
        )
        .route("/api/v1/sessions/{id}/respawn/reset-breaker", post(http::respawn_reset_breaker))
        .route("/api/v1/sessions/{id}/ralph", get(http::ralph_state))
        .route("/api/v1/sessions/{id}/ralph/config", put(http::ralph_configure))
        .route(
            "/api/v1/sessions/{id}/ralph/phrases",
            post(http::ralph_add_phrase).delete(http::ralph_remove_phrase),
        )
        .route("/api/v1/scheduled", get(http::list_scheduled).post(http::create_scheduled))
        .route("/api/v1/scheduled/{id}", get(http::get_scheduled))
        .route("/api/v1/scheduled/{id}/stop", post(http::stop_scheduled))
        .route("/api/v1/hook-event", post(http::hook_event))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until the supervisor's shutdown token fires.
pub async fn serve(state: Arc<ApiState>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let shutdown = state.supervisor.cleanup.token();
    let router = build_router(state);
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
