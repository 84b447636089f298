// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Wire-format record delivered to SSE clients: one `{event, data}` pair.
///
/// Event names are grouped by prefix (`session:*`, `respawn:*`, `mux:*`,
/// `hook:*`, `sched:*`); the fanout's cache invalidation and client-side
/// dispatch both key on the prefix, never on full-name equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self { event: event.into(), data }
    }
}

/// Event names used on the client channel. Contractual: clients dispatch on
/// these strings.
pub mod names {
    pub const INIT: &str = "init";

    pub const SESSION_CREATED: &str = "session:created";
    pub const SESSION_OUTPUT: &str = "session:output";
    pub const SESSION_STATUS: &str = "session:status";
    pub const SESSION_DELETED: &str = "session:deleted";
    pub const SESSION_NEEDS_REFRESH: &str = "session:needsRefresh";

    pub const RESPAWN_STATE_CHANGED: &str = "respawn:stateChanged";
    pub const RESPAWN_CYCLE_STARTED: &str = "respawn:cycleStarted";
    pub const RESPAWN_BLOCKED: &str = "respawn:blocked";
    pub const RESPAWN_EXIT_GATE: &str = "respawn:exitGateMet";
    pub const RESPAWN_BREAKER: &str = "respawn:circuitBreaker";

    pub const RALPH_LOOP: &str = "session:ralphLoop";
    pub const RALPH_TODOS: &str = "session:ralphTodos";
    pub const RALPH_COMPLETION: &str = "session:ralphCompletion";
    pub const RALPH_STATUS_BLOCK: &str = "session:ralphStatusBlock";
    pub const RALPH_PHRASE_WARNING: &str = "session:ralphPhraseWarning";
    pub const RALPH_STALL: &str = "session:ralphStall";

    pub const HOOK_EVENT: &str = "hook:event";
    pub const MUX_ADOPTED: &str = "mux:adopted";
    pub const MUX_ORPHAN_KILLED: &str = "mux:orphanKilled";

    pub const SCHED_STARTED: &str = "sched:started";
    pub const SCHED_STOPPED: &str = "sched:stopped";
}

/// Top-level error response envelope shared across the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Machine-readable code plus human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl crate::error::ErrorCode {
    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}
