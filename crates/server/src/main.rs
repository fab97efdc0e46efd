// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! shiplogd
//!
//! Ingest server for shiplog agents: accepts registrations, acks log
//! batches, and appends records to per-source JSONL files.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::path::PathBuf;
use std::sync::Arc;

use shiplog_server::{JsonlSink, Server, ServerConfig};
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
                println!("shiplogd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("shiplogd {}", env!("CARGO_PKG_VERSION"));
                println!("Ingest server for shiplog agents.");
                println!();
                println!("USAGE:");
                println!("    shiplogd [--config <path>]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <path>  Config file (default: $SHIPLOG_SERVER_CONFIG");
                println!("                         or /etc/shiplog/server.toml)");
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
                eprintln!("Usage: shiplogd [--config <path>]");
                std::process::exit(1);
            }
        }
    }

    setup_logging();

    let config_path = config_path.unwrap_or_else(shiplog_server::env::config_path);
    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    info!(config = %config_path.display(), "starting server");

    let sink = Arc::new(JsonlSink::new(config.data_dir.clone()));
    let server = Server::bind(config, sink).await?;

    let ctx = CancellationToken::new();
    spawn_signal_handler(ctx.clone())?;

    server.run(ctx).await?;
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
