// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::cleanup::CleanupManager;
use tokio::sync::mpsc;

fn handle() -> SessionHandle {
    let (cmd_tx, _cmd_rx) = mpsc::channel(4);
    let (respawn_tx, _respawn_rx) = mpsc::channel(4);
    SessionHandle::new(
        "11111111-2222-3333-4444-555555555555".to_owned(),
        Some("demo".to_owned()),
        "codeman-11111111".to_owned(),
        "/tmp/demo".into(),
        1_000,
        4242,
        cmd_tx,
        respawn_tx,
        CleanupManager::new(),
    )
}

#[yare::parameterized(
    idle_to_busy = { SessionStatus::Idle, SessionStatus::Busy, true },
    busy_to_idle = { SessionStatus::Busy, SessionStatus::Idle, true },
    busy_to_stopped = { SessionStatus::Busy, SessionStatus::Stopped, true },
    idle_to_stopped = { SessionStatus::Idle, SessionStatus::Stopped, true },
    error_to_stopped = { SessionStatus::Error, SessionStatus::Stopped, true },
    busy_to_error = { SessionStatus::Busy, SessionStatus::Error, true },
    idle_to_error = { SessionStatus::Idle, SessionStatus::Error, true },
    stopped_to_busy = { SessionStatus::Stopped, SessionStatus::Busy, false },
    stopped_to_error = { SessionStatus::Stopped, SessionStatus::Error, false },
    self_transition = { SessionStatus::Busy, SessionStatus::Busy, false },
    error_to_busy = { SessionStatus::Error, SessionStatus::Busy, false },
)]
fn status_transition_matrix(from: SessionStatus, to: SessionStatus, allowed: bool) {
    assert_eq!(SessionStatus::transition_allowed(from, to), allowed);
}

#[tokio::test]
async fn stopping_clears_the_pid() {
    let handle = handle();
    assert_eq!(handle.pid(), Some(4242));
    assert!(handle.set_status(SessionStatus::Stopped));
    assert_eq!(handle.pid(), None);
    assert_eq!(handle.status(), SessionStatus::Stopped);
    // Stopped is terminal.
    assert!(!handle.set_status(SessionStatus::Busy));
}

#[tokio::test]
async fn text_append_updates_the_tail_hash() {
    let handle = handle();
    let before = handle.tail_hash();
    handle.append_text("some fresh output\n");
    let after = handle.tail_hash();
    assert_ne!(before, after);
    assert_eq!(handle.text_tail(6), "utput\n");
}

#[tokio::test]
async fn messages_are_trimmed_to_the_keep_suffix() {
    let handle = handle();
    for i in 0..(MESSAGES_MAX + 1) {
        handle.push_message(serde_json::json!({ "i": i }));
    }
    let recent = handle.recent_messages(MESSAGES_MAX);
    assert_eq!(recent.len(), MESSAGES_KEEP);
    // The most recent entries survive.
    assert_eq!(recent.last().and_then(|m| m.get("i")).and_then(|v| v.as_u64()), Some(1000));
}

#[tokio::test]
async fn write_via_mux_rejects_multi_line_before_sending() {
    let handle = handle();
    let result = handle.write_via_mux("line one\nline two").await;
    assert_eq!(result, Err(WriteError::MultiLine));
}

#[tokio::test]
async fn info_reflects_the_handle() {
    let handle = handle();
    handle.add_tokens(500);
    handle.add_cost(0.25);
    handle.set_current_task_id(Some("run-1".to_owned()));
    let info = handle.info();
    assert_eq!(info.id, "11111111-2222-3333-4444-555555555555");
    assert_eq!(info.mux_name, "codeman-11111111");
    assert_eq!(info.status, SessionStatus::Busy);
    assert_eq!(info.tokens, 500);
    assert!((info.cost - 0.25).abs() < f64::EPSILON);
    assert_eq!(info.current_task_id.as_deref(), Some("run-1"));
}

#[tokio::test]
async fn raw_reads_tolerate_trimming() {
    let handle = handle();
    handle.append_raw(b"0123456789");
    let Some((total, bytes)) = handle.read_raw_from(4) else {
        unreachable!("offset within buffer")
    };
    assert_eq!(total, 10);
    assert_eq!(bytes, b"456789");
    assert!(handle.read_raw_from(11).is_none());
}
