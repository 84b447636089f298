// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter over the external terminal multiplexer hosting durable agent
//! sessions.

pub mod tmux;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub use tmux::TmuxMux;

/// Prefix for every multiplexer session owned by this supervisor.
pub const SESSION_PREFIX: &str = "codeman-";

/// Derive the multiplexer session name for a session id:
/// `codeman-<first 8 chars of id>`.
pub fn session_name(session_id: &str) -> String {
    let short: String = session_id.chars().take(8).collect();
    format!("{SESSION_PREFIX}{short}")
}

/// Whether a multiplexer session name belongs to this supervisor.
pub fn is_owned_name(name: &str) -> bool {
    name.strip_prefix(SESSION_PREFIX).is_some_and(|rest| !rest.is_empty())
}

/// Errors from the multiplexer adapter the supervisor dispatches on.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// No supported multiplexer binary was found at startup.
    #[error("no supported terminal multiplexer found in PATH")]
    Unavailable,
    /// The named session no longer exists. Fatal for that session.
    #[error("multiplexer session '{0}' no longer exists")]
    SessionGone(String),
    /// The backend is recognized but not implemented.
    #[error("multiplexer backend '{0}' is not yet implemented")]
    Unimplemented(&'static str),
    #[error("multiplexer command failed: {0}")]
    Command(String),
    #[error("multiplexer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MuxError {
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::SessionGone(_))
    }
}

/// Capability surface of a terminal multiplexer backend.
///
/// Text injection is literal (no shell interpretation). Enter is a separate
/// call: the hosted agent's line editor does not accept text and newline in
/// a single write.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Create a detached session running `command` in `working_dir` with
    /// extra environment variables.
    async fn create(
        &self,
        name: &str,
        working_dir: &Path,
        command: &str,
        cols: u16,
        rows: u16,
        env: &[(String, String)],
    ) -> Result<(), MuxError>;

    /// Type literal text into the session without pressing Enter.
    async fn send_literal_text(&self, name: &str, text: &str) -> Result<(), MuxError>;

    /// Press Enter in the session.
    async fn send_enter(&self, name: &str) -> Result<(), MuxError>;

    /// Tear down the named session.
    async fn kill(&self, name: &str) -> Result<(), MuxError>;

    /// Enumerate surviving session names (all of them, not just ours).
    async fn list(&self) -> Result<Vec<String>, MuxError>;

    /// Capture the last `lines` lines of the session's pane.
    async fn capture_pane(&self, name: &str, lines: u32) -> Result<Vec<u8>, MuxError>;

    /// argv that attaches an interactive terminal to the named session.
    fn attach_command(&self, name: &str) -> Vec<String>;
}

/// Auto-detect a multiplexer backend.
///
/// `preference` is `auto`, `tmux`, or `screen`. `auto` probes the supported
/// backends in order and fails with [`MuxError::Unavailable`] when none of
/// their binaries resolve.
pub fn detect(preference: &str) -> Result<Arc<dyn Multiplexer>, MuxError> {
    match preference {
        "tmux" => {
            if !tmux::binary_available() {
                return Err(MuxError::Unavailable);
            }
            Ok(Arc::new(TmuxMux::new()))
        }
        "screen" => Err(MuxError::Unimplemented("screen")),
        _ => {
            if tmux::binary_available() {
                return Ok(Arc::new(TmuxMux::new()));
            }
            Err(MuxError::Unavailable)
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
