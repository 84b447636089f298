// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watcher for a delimited `@fix_plan.md` in the session's working
//! directory. While the file exists it is the authoritative todo source and
//! output-based detection is suppressed.

use std::path::PathBuf;
use std::time::Duration;

use notify::Watcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::todo::{normalize, TodoItem, TodoStatus};

/// File name watched inside the session working directory.
pub const PLAN_FILE_NAME: &str = "@fix_plan.md";

/// Authoritative todo snapshot parsed from the plan file. `None` means the
/// file is absent and output-based detection should resume.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanUpdate {
    pub todos: Option<Vec<TodoItem>>,
}

pub struct PlanFileWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl PlanFileWatcher {
    pub fn new(working_dir: &std::path::Path) -> Self {
        Self { path: working_dir.join(PLAN_FILE_NAME), poll_interval: Duration::from_secs(5) }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Watch the plan file, sending a [`PlanUpdate`] on every observed
    /// change. Uses `notify` for filesystem events with a polling fallback.
    pub async fn run(
        self,
        update_tx: mpsc::Sender<PlanUpdate>,
        now_ms: impl Fn() -> u64 + Send,
        shutdown: CancellationToken,
    ) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.setup_notify_watcher(wake_tx);

        let mut poll = tokio::time::interval(self.poll_interval);
        let mut last: Option<Option<Vec<TodoItem>>> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {}
                _ = wake_rx.recv() => {}
            }

            let current = self.read_plan(now_ms());
            if last.as_ref() != Some(&current) {
                last = Some(current.clone());
                if update_tx.send(PlanUpdate { todos: current }).await.is_err() {
                    break;
                }
            }
        }
    }

    fn read_plan(&self, now_ms: u64) -> Option<Vec<TodoItem>> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        Some(parse_plan(&text, now_ms))
    }

    fn setup_notify_watcher(
        &self,
        wake_tx: mpsc::Sender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        let watcher = notify::recommended_watcher(move |result| {
            if let Ok(notify::Event { .. }) = result {
                let _ = wake_tx.try_send(());
            }
        });
        let mut watcher = match watcher {
            Ok(w) => w,
            Err(e) => {
                debug!("plan watcher unavailable, polling only: {e}");
                return None;
            }
        };
        // Watch the parent so create/delete of the plan file itself wakes us.
        let dir = self.path.parent()?;
        if let Err(e) = watcher.watch(dir, notify::RecursiveMode::NonRecursive) {
            debug!("plan watcher failed on {}: {e}", dir.display());
            return None;
        }
        Some(watcher)
    }
}

/// Parse checkbox lines from plan markdown into todos.
pub fn parse_plan(text: &str, now_ms: u64) -> Vec<TodoItem> {
    let mut todos = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed
            .strip_prefix("- [")
            .or_else(|| trimmed.strip_prefix("* ["))
            .or_else(|| trimmed.strip_prefix("+ ["))
        else {
            continue;
        };
        let mut chars = rest.chars();
        let mark = chars.next();
        if chars.next() != Some(']') {
            continue;
        }
        let status = match mark {
            Some(' ') => TodoStatus::Pending,
            Some('~') | Some('-') => TodoStatus::InProgress,
            Some('x') | Some('X') => TodoStatus::Completed,
            _ => continue,
        };
        let content = chars.as_str().trim();
        if let Some(normalized) = normalize(content) {
            todos.push(TodoItem::new(normalized, status, now_ms));
        }
    }
    todos
}

#[cfg(test)]
#[path = "planfile_tests.rs"]
mod tests;
