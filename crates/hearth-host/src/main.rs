// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hearth Host - Game Server Instance Host
//!
//! Runs the lifecycle runtime for the instances owned by this node:
//! - Job recovery after a restart
//! - Reattachment to servers that kept running while the host was down
//! - Crash bookkeeping for supervised servers
//!
//! On Ctrl-C the host detaches, leaving servers running for the next start.

use std::sync::Arc;
use tracing::{info, warn};

use hearth_host::config::Config;
use hearth_host::persistence::SqlitePersistence;
use hearth_host::registry::ShutdownMode;
use hearth_host::runner::{ProcessRunner, Runner};
use hearth_host::runtime::HostRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth_host=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        database_url = %config.database_url,
        swarm_identifier = ?config.swarm_identifier,
        server_command = %config.server_command.display(),
        "Starting Hearth Host"
    );

    // Connect and migrate
    let persistence = Arc::new(SqlitePersistence::connect(&config.database_url).await?);
    info!("Database schema verified");

    let runner = Arc::new(ProcessRunner::new(config.server_command.clone()));
    info!(runner_type = runner.runner_type(), "Runner initialized");

    let runtime = HostRuntime::builder()
        .config(&config)
        .persistence(persistence)
        .runner(runner)
        .build()?
        .start()
        .await?;

    info!(
        online = runtime.registry().online_ids().await.len(),
        "Hearth Host ready"
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Servers keep running; the next start reattaches.
    runtime.shutdown(ShutdownMode::Detach).await?;

    info!("Hearth Host shut down");

    Ok(())
}
