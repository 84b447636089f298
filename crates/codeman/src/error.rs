// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error codes surfaced to clients across the HTTP and SSE surfaces.
///
/// The code string is the stable contract clients dispatch on; the
/// accompanying message is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    SessionNotFound,
    SessionGone,
    SessionStopped,
    MuxUnavailable,
    BadRequest,
    Unauthorized,
    RateLimited,
    RespawnBroken,
    AlreadyChecking,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SessionNotFound => 404,
            Self::SessionGone => 410,
            Self::SessionStopped => 409,
            Self::MuxUnavailable => 503,
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::RateLimited => 429,
            Self::RespawnBroken => 409,
            Self::AlreadyChecking => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionGone => "SESSION_GONE",
            Self::SessionStopped => "SESSION_STOPPED",
            Self::MuxUnavailable => "MUX_UNAVAILABLE",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::RespawnBroken => "RESPAWN_BROKEN",
            Self::AlreadyChecking => "ALREADY_CHECKING",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
