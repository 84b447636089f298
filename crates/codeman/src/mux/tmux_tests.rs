// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::mux::{Multiplexer, MuxError};

#[test]
fn attach_command_targets_session() {
    let mux = TmuxMux::new();
    assert_eq!(
        mux.attach_command("codeman-01234567"),
        vec!["tmux", "attach-session", "-t", "codeman-01234567"]
    );
}

#[test]
fn attach_command_carries_socket() {
    let mux = TmuxMux::with_socket("/tmp/codeman-test.sock".into());
    let argv = mux.attach_command("codeman-x");
    assert_eq!(argv[0], "tmux");
    assert_eq!(argv[1], "-S");
    assert_eq!(argv[2], "/tmp/codeman-test.sock");
    assert_eq!(&argv[3..], ["attach-session", "-t", "codeman-x"]);
}

// Exercises the real binary when present; skipped silently otherwise so CI
// without tmux still passes.
#[tokio::test]
async fn list_returns_empty_without_server() -> anyhow::Result<()> {
    if !binary_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let mux = TmuxMux::with_socket(dir.path().join("mux.sock"));
    assert_eq!(mux.list().await?, Vec::<String>::new());
    Ok(())
}

#[tokio::test]
async fn send_to_missing_session_is_session_gone() -> anyhow::Result<()> {
    if !binary_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let mux = TmuxMux::with_socket(dir.path().join("mux.sock"));
    let result = mux.send_literal_text("codeman-missing", "hello").await;
    assert!(matches!(result, Err(MuxError::SessionGone(_))));
    Ok(())
}
