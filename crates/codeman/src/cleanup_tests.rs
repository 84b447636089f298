// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::CleanupManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn dispose_cancels_token() {
    let mgr = CleanupManager::new();
    let token = mgr.token();
    assert!(!token.is_cancelled());
    mgr.dispose();
    assert!(token.is_cancelled());
    assert!(mgr.is_disposed());
}

#[tokio::test]
async fn dispose_is_idempotent() {
    let mgr = CleanupManager::new();
    mgr.dispose();
    mgr.dispose();
    assert!(mgr.is_disposed());
}

#[tokio::test]
async fn dispose_aborts_registered_tasks() {
    let mgr = CleanupManager::new();
    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = Arc::clone(&ran);
    mgr.register(tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        ran_clone.store(true, Ordering::SeqCst);
    }));
    mgr.dispose();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn child_manager_follows_parent() {
    let parent = tokio_util::sync::CancellationToken::new();
    let mgr = CleanupManager::child_of(&parent);
    parent.cancel();
    assert!(mgr.is_disposed());
}
