// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY session: one agent subprocess inside a durable multiplexer session,
//! its bounded buffers, derived status, and the authoritative write path
//! for programmatic input.

pub mod detect;
pub mod run;

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::buffer::BoundedBuffer;
use crate::cleanup::CleanupManager;
use crate::respawn::controller::ControllerMsg;
use crate::tracker::RalphSnapshot;

pub use run::{spawn_session, SessionSpawn};

/// Raw terminal buffer: 2 MiB high-watermark, trimmed to 1.5 MiB.
pub const RAW_BUFFER_MAX: usize = 2 * 1024 * 1024;
pub const RAW_BUFFER_KEEP: usize = 1536 * 1024;
/// Text buffer: 1 MiB high-watermark, trimmed to 768 KiB.
pub const TEXT_BUFFER_MAX: usize = 1024 * 1024;
pub const TEXT_BUFFER_KEEP: usize = 768 * 1024;
/// Parsed structured messages: 1000 entries, trimmed to 800.
pub const MESSAGES_MAX: usize = 1000;
pub const MESSAGES_KEEP: usize = 800;
/// Bytes of the text tail hashed for the quiescence comparison.
pub const TAIL_HASH_WINDOW: usize = 256;
/// Window of stripped text handed to the AI arbiter.
pub const ARBITER_WINDOW: usize = 4096;
/// Prompt-glyph quiescence before the session is considered idle.
pub const PROBABLY_IDLE_MS: u64 = 2_000;
/// Delay between typing injected text and pressing Enter.
pub const WRITE_ENTER_DELAY_MS: u64 = 120;

/// Session status. Legal transitions: idle ↔ busy, any → stopped,
/// any live → error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Busy,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Whether `from → to` is a legal transition.
    pub fn transition_allowed(from: SessionStatus, to: SessionStatus) -> bool {
        if from == to {
            return false;
        }
        match (from, to) {
            (Self::Idle, Self::Busy) | (Self::Busy, Self::Idle) => true,
            (Self::Stopped, _) => false,
            (_, Self::Stopped) | (_, Self::Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Programmatic write failures surfaced to the controller and the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The write path only accepts single-line input.
    MultiLine,
    /// The multiplexer lost the session. Fatal for this session.
    SessionGone,
    /// The session task is gone.
    Closed,
}

/// Commands handled by the session task.
pub enum SessionCommand {
    /// Raw client keystrokes, written straight to the PTY.
    WriteRaw(Bytes),
    /// Programmatic input: literal text then Enter through the multiplexer.
    WriteViaMux { text: String, reply: oneshot::Sender<Result<(), WriteError>> },
    Resize { cols: u16, rows: u16 },
    Ralph(RalphOp),
    Stop { reply: oneshot::Sender<()> },
}

/// Tracker operations routed through the session task (the tracker flushes
/// pending debounced events before every cross-cutting read).
pub enum RalphOp {
    Snapshot { reply: oneshot::Sender<RalphSnapshot> },
    Configure { completion_phrase: Option<String>, max_iterations: Option<u32> },
    AddAlternatePhrase(String),
    RemoveAlternatePhrase(String),
    SoftReset,
}

/// Client-facing session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub name: Option<String>,
    pub mux_name: String,
    pub working_dir: PathBuf,
    pub created_at_ms: u64,
    pub status: SessionStatus,
    pub pid: Option<u32>,
    pub last_activity_at_ms: u64,
    pub tokens: u64,
    pub cost: f64,
    pub current_task_id: Option<String>,
}

/// Shared handle to one session, owned by the supervisor.
pub struct SessionHandle {
    pub id: String,
    pub name: Option<String>,
    pub mux_name: String,
    pub working_dir: PathBuf,
    pub created_at_ms: u64,

    status: Mutex<SessionStatus>,
    pid: AtomicU32,
    pub last_activity_ms: AtomicU64,
    tokens: AtomicU64,
    cost: Mutex<f64>,
    tail_hash: AtomicU64,

    raw: Mutex<BoundedBuffer>,
    text: Mutex<BoundedBuffer>,
    messages: Mutex<VecDeque<serde_json::Value>>,
    next_todo: Mutex<Option<String>>,
    current_task_id: Mutex<Option<String>>,

    cmd_tx: mpsc::Sender<SessionCommand>,
    respawn_tx: mpsc::Sender<ControllerMsg>,
    pub cleanup: CleanupManager,
}

impl SessionHandle {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        name: Option<String>,
        mux_name: String,
        working_dir: PathBuf,
        created_at_ms: u64,
        pid: u32,
        cmd_tx: mpsc::Sender<SessionCommand>,
        respawn_tx: mpsc::Sender<ControllerMsg>,
        cleanup: CleanupManager,
    ) -> Self {
        Self {
            id,
            name,
            mux_name,
            working_dir,
            created_at_ms,
            status: Mutex::new(SessionStatus::Busy),
            pid: AtomicU32::new(pid),
            last_activity_ms: AtomicU64::new(created_at_ms),
            tokens: AtomicU64::new(0),
            cost: Mutex::new(0.0),
            tail_hash: AtomicU64::new(0),
            raw: Mutex::new(BoundedBuffer::new(RAW_BUFFER_MAX, RAW_BUFFER_KEEP)),
            text: Mutex::new(BoundedBuffer::new(TEXT_BUFFER_MAX, TEXT_BUFFER_KEEP)),
            messages: Mutex::new(VecDeque::new()),
            next_todo: Mutex::new(None),
            current_task_id: Mutex::new(None),
            cmd_tx,
            respawn_tx,
            cleanup,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Apply a status transition if legal. Stopping clears the pid
    /// (invariant: pid is non-null iff the process is alive).
    pub fn set_status(&self, next: SessionStatus) -> bool {
        let mut status = self.status.lock();
        if !SessionStatus::transition_allowed(*status, next) {
            return false;
        }
        *status = next;
        if next == SessionStatus::Stopped {
            self.pid.store(0, Ordering::Release);
        }
        true
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    pub fn add_tokens(&self, n: u64) {
        self.tokens.fetch_add(n, Ordering::Relaxed);
    }

    pub fn cost(&self) -> f64 {
        *self.cost.lock()
    }

    pub fn add_cost(&self, amount: f64) {
        *self.cost.lock() += amount;
    }

    pub fn tail_hash(&self) -> u64 {
        self.tail_hash.load(Ordering::Relaxed)
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.current_task_id.lock().clone()
    }

    pub fn set_current_task_id(&self, task: Option<String>) {
        *self.current_task_id.lock() = task;
    }

    pub fn next_todo(&self) -> Option<String> {
        self.next_todo.lock().clone()
    }

    pub(crate) fn set_next_todo(&self, todo: Option<String>) {
        *self.next_todo.lock() = todo;
    }

    /// Append raw terminal bytes (session task only).
    pub(crate) fn append_raw(&self, bytes: &[u8]) {
        self.raw.lock().append(bytes);
    }

    /// Append stripped text and refresh the tail hash (session task only).
    pub(crate) fn append_text(&self, text: &str) {
        let mut buf = self.text.lock();
        buf.append(text.as_bytes());
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        buf.tail(TAIL_HASH_WINDOW).hash(&mut hasher);
        self.tail_hash.store(hasher.finish(), Ordering::Relaxed);
    }

    /// Raw bytes from a global offset; `None` when trimmed away or too new.
    pub fn read_raw_from(&self, offset: u64) -> Option<(u64, Vec<u8>)> {
        let buf = self.raw.lock();
        buf.read_from(offset).map(|b| (buf.total_written(), b.to_vec()))
    }

    pub fn raw_total_written(&self) -> u64 {
        self.raw.lock().total_written()
    }

    /// Most recent stripped text, up to `n` bytes.
    pub fn text_tail(&self, n: usize) -> String {
        String::from_utf8_lossy(self.text.lock().tail(n)).into_owned()
    }

    /// Record a parsed structured message, trimming to the keep-suffix.
    pub(crate) fn push_message(&self, message: serde_json::Value) {
        let mut messages = self.messages.lock();
        messages.push_back(message);
        if messages.len() > MESSAGES_MAX {
            while messages.len() > MESSAGES_KEEP {
                messages.pop_front();
            }
        }
    }

    pub fn recent_messages(&self, limit: usize) -> Vec<serde_json::Value> {
        let messages = self.messages.lock();
        messages.iter().rev().take(limit).rev().cloned().collect()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            mux_name: self.mux_name.clone(),
            working_dir: self.working_dir.clone(),
            created_at_ms: self.created_at_ms,
            status: self.status(),
            pid: self.pid(),
            last_activity_at_ms: self.last_activity_ms.load(Ordering::Relaxed),
            tokens: self.tokens(),
            cost: self.cost(),
            current_task_id: self.current_task_id(),
        }
    }

    pub fn respawn_tx(&self) -> mpsc::Sender<ControllerMsg> {
        self.respawn_tx.clone()
    }

    pub(crate) fn cmd_tx(&self) -> mpsc::Sender<SessionCommand> {
        self.cmd_tx.clone()
    }

    pub async fn send_command(&self, command: SessionCommand) -> Result<(), WriteError> {
        self.cmd_tx.send(command).await.map_err(|_| WriteError::Closed)
    }

    /// Programmatic single-line write through the multiplexer (text, brief
    /// delay, Enter). Serialized by the session task.
    pub async fn write_via_mux(&self, text: impl Into<String>) -> Result<(), WriteError> {
        let text = text.into();
        if text.contains('\n') || text.contains('\r') {
            return Err(WriteError::MultiLine);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(SessionCommand::WriteViaMux { text, reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| WriteError::Closed)?
    }

    /// Stop the subprocess; the handle remains addressable as stopped.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.send_command(SessionCommand::Stop { reply: reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
        self.cleanup.dispose();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
