// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced persistence of the supervisor state to a single JSON document.
//!
//! Writes are atomic (temp file + rename) and never block the supervision
//! hot path: mutations land in memory, a notifier wakes the writer task,
//! and a failed write is retried from the latest snapshot on the next
//! debounce tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::respawn::RespawnConfig;
use crate::session::SessionStatus;

/// Debounce window between a mutation and the disk write.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Per-session snapshot persisted across supervisor restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub status: SessionStatus,
    pub working_dir: PathBuf,
    pub name: Option<String>,
    pub created_at_ms: u64,
    pub last_activity_at_ms: u64,
    pub tokens: u64,
    pub cost: f64,
    #[serde(default)]
    pub respawn: RespawnConfig,
}

/// Scheduled-run snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTask {
    pub session_id: String,
    pub prompt: String,
    pub started_at_ms: u64,
    pub duration_minutes: u64,
    pub tasks_completed: u32,
    pub cost: f64,
    pub active: bool,
}

/// Ralph loop snapshot persisted per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedLoop {
    pub enabled: bool,
    pub cycles: u32,
    pub completion_phrase: Option<String>,
    pub alternate_phrases: Vec<String>,
}

/// The single persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub sessions: HashMap<String, PersistedSession>,
    #[serde(default)]
    pub tasks: HashMap<String, PersistedTask>,
    #[serde(default, rename = "ralphLoop")]
    pub ralph_loop: HashMap<String, PersistedLoop>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

pub struct StateStore {
    path: PathBuf,
    latest: Mutex<PersistedState>,
    dirty: Notify,
}

impl StateStore {
    /// Load the document from disk, falling back to an empty state when the
    /// file is missing or unreadable.
    pub fn load(path: PathBuf) -> Arc<Self> {
        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!("state document at {} is corrupt, starting fresh: {e}", path.display());
                    PersistedState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                warn!("cannot read state document at {}: {e}", path.display());
                PersistedState::default()
            }
        };
        Arc::new(Self { path, latest: Mutex::new(state), dirty: Notify::new() })
    }

    pub fn snapshot(&self) -> PersistedState {
        self.latest.lock().clone()
    }

    /// Mutate the in-memory state and schedule a debounced write.
    pub fn update(&self, mutate: impl FnOnce(&mut PersistedState)) {
        {
            let mut state = self.latest.lock();
            mutate(&mut state);
        }
        self.dirty.notify_one();
    }

    /// Write the current snapshot now (shutdown path).
    pub fn write_now(&self) -> anyhow::Result<()> {
        let state = self.snapshot();
        self.write_atomic(&state)
    }

    /// Debounced writer loop. Spawned once by the supervisor.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.dirty.notified() => {}
            }
            // Coalesce further mutations inside the debounce window.
            tokio::time::sleep(PERSIST_DEBOUNCE).await;
            let state = self.snapshot();
            if let Err(e) = self.write_atomic(&state) {
                // Surfaced as a warning; the next mutation retries from the
                // latest in-memory snapshot.
                warn!("state persist failed: {e}");
            }
        }
        if let Err(e) = self.write_now() {
            warn!("final state persist failed: {e}");
        }
    }

    fn write_atomic(&self, state: &PersistedState) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.persist(&self.path)?;
        debug!("state persisted to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
