// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Centralized disposal for the timers, watchers, and tasks owned by one
/// component.
///
/// Every spawned task either selects on [`CleanupManager::token`] or is
/// registered via [`CleanupManager::register`] so `dispose()` can abort it.
/// Disposal is idempotent.
pub struct CleanupManager {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for CleanupManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupManager {
    pub fn new() -> Self {
        Self { token: CancellationToken::new(), handles: Mutex::new(Vec::new()) }
    }

    /// Create a manager whose token is a child of `parent`; disposing the
    /// parent cancels this manager too.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self { token: parent.child_token(), handles: Mutex::new(Vec::new()) }
    }

    /// The cancellation token cooperative tasks should select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a task handle for hard abort on disposal.
    ///
    /// Finished handles are pruned opportunistically so long-lived components
    /// don't accumulate them.
    pub fn register(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and abort every registered task.
    pub fn dispose(&self) {
        self.token.cancel();
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for CleanupManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;
