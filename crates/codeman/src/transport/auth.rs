// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional username/password authentication: HTTP Basic on the login
//! route, then an HTTP-only session cookie with a sliding TTL.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;

use crate::clock::epoch_ms;
use crate::error::ErrorCode;

use super::{error_response, ApiState};

pub const COOKIE_NAME: &str = "codeman_session";
/// Sliding cookie TTL: 24 hours.
pub const COOKIE_TTL_MS: u64 = 24 * 60 * 60 * 1000;
/// Concurrent cookie sessions; least-recently-used is evicted.
pub const MAX_COOKIE_SESSIONS: usize = 100;
/// Failed attempts per client address before lockout.
pub const MAX_FAILED_ATTEMPTS: u32 = 10;
/// Lockout duration after an auth flood.
pub const LOCKOUT_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Default, Clone, Copy)]
struct FailureWindow {
    count: u32,
    blocked_until_ms: u64,
}

/// Credential + cookie-session state. Present only when auth is configured.
pub struct AuthState {
    username: String,
    password: String,
    /// token → expiry, insertion-ordered for LRU eviction.
    cookies: Mutex<IndexMap<String, u64>>,
    failures: Mutex<HashMap<IpAddr, FailureWindow>>,
}

impl AuthState {
    pub fn new(username: String, password: String) -> Self {
        Self {
            username,
            password,
            cookies: Mutex::new(IndexMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Validate credentials from one client address. Issues a cookie token
    /// on success; counts failures per address and locks out floods.
    pub fn login(
        &self,
        username: &str,
        password: &str,
        addr: IpAddr,
        now_ms: u64,
    ) -> Result<String, ErrorCode> {
        {
            let failures = self.failures.lock();
            if let Some(window) = failures.get(&addr) {
                if now_ms < window.blocked_until_ms {
                    return Err(ErrorCode::RateLimited);
                }
            }
        }

        let ok = constant_time_eq(username, &self.username)
            && constant_time_eq(password, &self.password);
        if !ok {
            let mut failures = self.failures.lock();
            let window = failures.entry(addr).or_default();
            if now_ms >= window.blocked_until_ms && window.blocked_until_ms != 0 {
                // Lockout expired: the counter decays.
                window.count = 0;
                window.blocked_until_ms = 0;
            }
            window.count += 1;
            if window.count >= MAX_FAILED_ATTEMPTS {
                window.blocked_until_ms = now_ms + LOCKOUT_MS;
                return Err(ErrorCode::RateLimited);
            }
            return Err(ErrorCode::Unauthorized);
        }

        self.failures.lock().remove(&addr);

        let token = new_token();
        let mut cookies = self.cookies.lock();
        cookies.insert(token.clone(), now_ms + COOKIE_TTL_MS);
        while cookies.len() > MAX_COOKIE_SESSIONS {
            cookies.shift_remove_index(0);
        }
        Ok(token)
    }

    /// Validate a cookie token, sliding its TTL and refreshing its LRU
    /// position.
    pub fn validate(&self, token: &str, now_ms: u64) -> bool {
        let mut cookies = self.cookies.lock();
        let Some(expires) = cookies.get(token).copied() else { return false };
        if now_ms >= expires {
            cookies.shift_remove(token);
            return false;
        }
        cookies.shift_remove(token);
        cookies.insert(token.to_owned(), now_ms + COOKIE_TTL_MS);
        true
    }

    pub fn logout(&self, token: &str) {
        self.cookies.lock().shift_remove(token);
    }

    pub fn active_sessions(&self) -> usize {
        self.cookies.lock().len()
    }
}

fn new_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 24] = rng.random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time string comparison to avoid timing side channels.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Extract the session cookie value from request headers.
pub fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix(COOKIE_NAME) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_owned());
            }
        }
    }
    None
}

/// Parse `Authorization: Basic …` into (username, password).
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

/// Middleware enforcing cookie auth on every route except health, login,
/// and the loopback-only hook ingest.
pub async fn auth_layer(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    // The hook-ingest endpoint bypasses auth for loopback sources only.
    if path == "/api/v1/hook-event" {
        if addr.ip().is_loopback() {
            return next.run(req).await;
        }
        return error_response(ErrorCode::Unauthorized, "hook ingest is loopback-only");
    }

    let Some(auth) = state.auth.as_ref() else {
        return next.run(req).await;
    };

    if path == "/api/v1/health" || path == "/api/v1/login" {
        return next.run(req).await;
    }

    match cookie_token(req.headers()) {
        Some(token) if auth.validate(&token, epoch_ms()) => next.run(req).await,
        _ => error_response(ErrorCode::Unauthorized, "authentication required"),
    }
}

/// `POST /api/v1/login`: HTTP Basic in, session cookie out.
pub async fn login(
    State(state): State<Arc<ApiState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some(auth) = state.auth.as_ref() else {
        return error_response(ErrorCode::BadRequest, "authentication is not configured");
    };
    let Some((username, password)) = basic_credentials(&headers) else {
        return error_response(ErrorCode::Unauthorized, "missing Basic credentials");
    };
    match auth.login(&username, &password, addr.ip(), epoch_ms()) {
        Ok(token) => {
            let cookie = format!(
                "{COOKIE_NAME}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
                COOKIE_TTL_MS / 1000
            );
            (
                StatusCode::NO_CONTENT,
                [(header::SET_COOKIE, cookie)],
            )
                .into_response()
        }
        Err(code) => error_response(code, "login failed"),
    }
}

/// `POST /api/v1/logout`: drop the cookie session.
pub async fn logout(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    if let (Some(auth), Some(token)) = (state.auth.as_ref(), cookie_token(&headers)) {
        auth.logout(&token);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
