// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use codeman::config::Config;
use codeman::supervisor::Supervisor;
use codeman::transport::{self, ApiState};

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / CODEMAN_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("CODEMAN_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

async fn run(config: Config) -> anyhow::Result<()> {
    let supervisor = Supervisor::start(config).await?;

    // Signal handler: first signal drains gracefully, second forces exit.
    {
        let supervisor = std::sync::Arc::clone(&supervisor);
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                }
            }
            supervisor.dispose().await;

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {}
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {}
            }
            info!("second signal, forcing exit");
            std::process::exit(130);
        });
    }

    let addr = format!("{}:{}", supervisor.config.host, supervisor.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", listener.local_addr()?);

    let state = ApiState::new(std::sync::Arc::clone(&supervisor))?;
    let result = transport::serve(state, listener).await;
    if result.is_err() {
        // Attempt graceful disposal before the non-zero exit.
        supervisor.dispose().await;
    }
    result
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        // Top-level guard: log, then exit non-zero so a supervising process
        // can restart us.
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
