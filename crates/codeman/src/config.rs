// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Supervisor for long-running interactive AI coding agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "codeman", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "CODEMAN_PORT", default_value = "7777")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "CODEMAN_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Username for API authentication (auth disabled when unset).
    #[arg(long, env = "CODEMAN_AUTH_USER")]
    pub auth_user: Option<String>,

    /// Password for API authentication.
    #[arg(long, env = "CODEMAN_AUTH_PASSWORD")]
    pub auth_password: Option<String>,

    /// Agent CLI to spawn inside multiplexer sessions.
    #[arg(long, env = "CODEMAN_AGENT", default_value = "claude")]
    pub agent: String,

    /// Headless agent CLI for AI idle arbitration (defaults to `--agent`).
    #[arg(long, env = "CODEMAN_ARBITER_AGENT")]
    pub arbiter_agent: Option<String>,

    /// Multiplexer backend: auto, tmux, or screen.
    #[arg(long, env = "CODEMAN_MUX", default_value = "auto")]
    pub mux: String,

    /// Path of the persisted state document.
    #[arg(long, env = "CODEMAN_STATE_PATH")]
    pub state_path: Option<PathBuf>,

    /// Terminal columns for new sessions.
    #[arg(long, env = "CODEMAN_COLS", default_value = "200")]
    pub cols: u16,

    /// Terminal rows for new sessions.
    #[arg(long, env = "CODEMAN_ROWS", default_value = "50")]
    pub rows: u16,

    /// Seconds without output before a busy session is suspected idle.
    #[arg(long, env = "CODEMAN_IDLE_TIMEOUT", default_value = "30")]
    pub idle_timeout: u64,

    /// Seconds the idle suspicion must hold before acting on it.
    #[arg(long, env = "CODEMAN_COMPLETION_CONFIRM", default_value = "10")]
    pub completion_confirm: u64,

    /// Seconds of total silence that confirm idleness when the AI check fails.
    #[arg(long, env = "CODEMAN_NO_OUTPUT_TIMEOUT", default_value = "120")]
    pub no_output_timeout: u64,

    /// Enable AI arbitration of suspected-idle states.
    #[arg(long, env = "CODEMAN_AI_IDLE_CHECK", default_value = "false")]
    pub ai_idle_check: bool,

    /// Seconds before an AI idle check times out.
    #[arg(long, env = "CODEMAN_AI_CHECK_TIMEOUT", default_value = "30")]
    pub ai_check_timeout: u64,

    /// Cooldown seconds after the arbiter reports WORKING.
    #[arg(long, env = "CODEMAN_AI_CHECK_COOLDOWN", default_value = "300")]
    pub ai_check_cooldown: u64,

    /// Override for the working-directory allowlist pattern.
    #[arg(long, env = "CODEMAN_WORKDIR_ALLOW")]
    pub workdir_allow: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "CODEMAN_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CODEMAN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(10..=500).contains(&self.cols) || !(5..=200).contains(&self.rows) {
            anyhow::bail!("terminal size out of range: {}x{}", self.cols, self.rows);
        }
        if self.auth_user.is_some() != self.auth_password.is_some() {
            anyhow::bail!("--auth-user and --auth-password must be set together");
        }
        match self.mux.as_str() {
            "auto" | "tmux" | "screen" => {}
            other => anyhow::bail!("invalid mux backend: {other}"),
        }
        if self.idle_timeout == 0 {
            anyhow::bail!("--idle-timeout must be non-zero");
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn completion_confirm(&self) -> Duration {
        Duration::from_secs(self.completion_confirm)
    }

    pub fn no_output_timeout(&self) -> Duration {
        Duration::from_secs(self.no_output_timeout)
    }

    pub fn ai_check_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_check_timeout)
    }

    pub fn ai_check_cooldown(&self) -> Duration {
        Duration::from_secs(self.ai_check_cooldown)
    }

    /// Resolve the state document path, defaulting to
    /// `$XDG_STATE_HOME/codeman/state.json`.
    pub fn state_path(&self) -> PathBuf {
        if let Some(ref p) = self.state_path {
            return p.clone();
        }
        let state_home = std::env::var("XDG_STATE_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_default();
            format!("{home}/.local/state")
        });
        PathBuf::from(state_home).join("codeman").join("state.json")
    }

    pub fn arbiter_agent(&self) -> &str {
        self.arbiter_agent.as_deref().unwrap_or(&self.agent)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
