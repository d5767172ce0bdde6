// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use engine_relay::cli::Args;
use engine_relay::config::{config_path, load_config};
use engine_relay::http::{AppState, build_router};
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let path = config_path(args.config);
    let config = load_config(path.as_deref())?;
    simple_logger::init_with_level(config.log_level()?)?;
    info!(
        "engine-relayd starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    if config.tokens.is_empty() {
        warn!("no tokens configured, any non-empty bearer token is accepted and only the lease is enforced");
    }

    let state = AppState::new(&config);
    let engine = state.engine.clone();
    let app = build_router(state);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("engine-relayd listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    engine.stop_engine().await;
    info!("engine-relayd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            log::error!("failed to install signal handlers: {e}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}
