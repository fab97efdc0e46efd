// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! shiplog agent
//!
//! Tails configured log sources, parses lines into records, and streams
//! batches to a shiplog server with at-least-once delivery.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::PathBuf;

use shiplog_agent::{Agent, AgentConfig};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("shiplog-agent {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("shiplog-agent {}", env!("CARGO_PKG_VERSION"));
                println!("Ships local log files to a shiplog server.");
                println!();
                println!("USAGE:");
                println!("    shiplog-agent [--config <path>]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <path>  Config file (default: $SHIPLOG_AGENT_CONFIG");
                println!("                         or /etc/shiplog/agent.toml)");
                println!("    -h, --help           Print help information");
                println!("    -V, --version        Print version information");
                return Ok(());
            }
            "--config" | "-c" => {
                let Some(path) = args.next() else {
                    eprintln!("error: --config requires a path");
                    std::process::exit(1);
                };
                config_path = Some(PathBuf::from(path));
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: shiplog-agent [--config <path>]");
                std::process::exit(1);
            }
        }
    }

    setup_logging();

    let config_path = config_path.unwrap_or_else(shiplog_agent::env::config_path);
    let config = match AgentConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(config = %config_path.display(), server = %config.server_addr, "starting agent");

    let ctx = CancellationToken::new();
    spawn_signal_handler(ctx.clone())?;

    Agent::new(config).run(ctx).await?;
    Ok(())
}

fn spawn_signal_handler(ctx: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        ctx.cancel();
    });

    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_env("SHIPLOG_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
