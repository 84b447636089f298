// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use super::{Multiplexer, MuxError};

/// tmux-backed multiplexer adapter.
///
/// When `socket` is set, every invocation uses `-S <path>` to address an
/// isolated tmux server instead of the user's default (used by tests).
pub struct TmuxMux {
    socket: Option<PathBuf>,
}

impl Default for TmuxMux {
    fn default() -> Self {
        Self::new()
    }
}

impl TmuxMux {
    pub fn new() -> Self {
        Self { socket: None }
    }

    pub fn with_socket(socket: PathBuf) -> Self {
        Self { socket: Some(socket) }
    }

    fn cmd(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("tmux");
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run a tmux subcommand, mapping a vanished-session failure to
    /// [`MuxError::SessionGone`].
    async fn run_checked(&self, name: &str, args: &[&str]) -> Result<Vec<u8>, MuxError> {
        let out = self.cmd().args(args).output().await?;
        if out.status.success() {
            return Ok(out.stdout);
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("can't find session")
            || stderr.contains("session not found")
            || stderr.contains("no server running")
        {
            return Err(MuxError::SessionGone(name.to_owned()));
        }
        Err(MuxError::Command(format!("tmux {}: {}", args.first().unwrap_or(&""), stderr.trim())))
    }
}

#[async_trait]
impl Multiplexer for TmuxMux {
    async fn create(
        &self,
        name: &str,
        working_dir: &Path,
        command: &str,
        cols: u16,
        rows: u16,
        env: &[(String, String)],
    ) -> Result<(), MuxError> {
        let dir = working_dir.display().to_string();
        let cols = cols.to_string();
        let rows = rows.to_string();
        let mut args: Vec<String> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            name.into(),
            "-c".into(),
            dir,
            "-x".into(),
            cols,
            "-y".into(),
            rows,
        ];
        for (key, value) in env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(command.into());
        let out = self.cmd().args(&args).output().await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(MuxError::Command(format!("tmux new-session: {}", stderr.trim())));
        }
        Ok(())
    }

    async fn send_literal_text(&self, name: &str, text: &str) -> Result<(), MuxError> {
        // -l sends the text verbatim: no key-name lookup, no shell expansion.
        self.run_checked(name, &["send-keys", "-l", "-t", name, text]).await?;
        Ok(())
    }

    async fn send_enter(&self, name: &str) -> Result<(), MuxError> {
        self.run_checked(name, &["send-keys", "-t", name, "Enter"]).await?;
        Ok(())
    }

    async fn kill(&self, name: &str) -> Result<(), MuxError> {
        match self.run_checked(name, &["kill-session", "-t", name]).await {
            Ok(_) | Err(MuxError::SessionGone(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<String>, MuxError> {
        let out =
            self.cmd().args(["list-sessions", "-F", "#{session_name}"]).output().await?;
        if !out.status.success() {
            // tmux exits non-zero when no server is running; that simply
            // means there are no surviving sessions.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::to_owned)
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn capture_pane(&self, name: &str, lines: u32) -> Result<Vec<u8>, MuxError> {
        let start = format!("-{lines}");
        self.run_checked(name, &["capture-pane", "-p", "-t", name, "-S", &start]).await
    }

    fn attach_command(&self, name: &str) -> Vec<String> {
        let mut argv = vec!["tmux".to_owned()];
        if let Some(ref s) = self.socket {
            argv.push("-S".to_owned());
            argv.push(s.display().to_string());
        }
        argv.extend(["attach-session", "-t", name].map(str::to_owned));
        argv
    }
}

/// Whether the tmux binary resolves on PATH.
pub fn binary_available() -> bool {
    std::process::Command::new("tmux")
        .arg("-V")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

#[cfg(test)]
#[path = "tmux_tests.rs"]
mod tests;
