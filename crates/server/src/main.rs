mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use maimai_agent::ConversationRuntime;
use maimai_core::config::{AppConfig, LoadOptions};
use maimai_core::ApplicationError;
use tokio::task::JoinHandle;

fn init_logging(config: &AppConfig) {
    use maimai_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the config, so load it before anything else.
    let config = AppConfig::load(LoadOptions::default()).map_err(ApplicationError::from)?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState {
            runtime: app.runtime.clone(),
            audit: app.audit.clone(),
            db_pool: app.db_pool.clone(),
        },
    )
    .await?;

    let reaper = spawn_reaper(
        app.runtime.clone(),
        Duration::from_secs(app.config.session.reap_interval_secs.max(1)),
    );

    tracing::info!(event_name = "system.server.started", "maimai-server started");
    tokio::select! {
        result = app.channel_runner.start() => {
            result?;
            tracing::info!(
                event_name = "system.server.transport_closed",
                "channel transport finished; waiting for shutdown signal"
            );
            wait_for_shutdown().await?;
        }
        signal = wait_for_shutdown() => signal?,
    }
    tracing::info!(event_name = "system.server.stopping", "maimai-server stopping");

    reaper.abort();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, app.runtime.conversations().persist()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::warn!(
            event_name = "system.server.final_persist_failed",
            error = %error,
            "could not persist conversations on shutdown"
        ),
        Err(_) => tracing::warn!(
            event_name = "system.server.final_persist_timed_out",
            grace_secs = grace.as_secs(),
            "gave up persisting conversations on shutdown"
        ),
    }
    if let Some(pool) = &app.db_pool {
        pool.close().await;
    }

    Ok(())
}

/// Periodically drops expired wake windows and idle per-user run locks.
fn spawn_reaper(runtime: Arc<ConversationRuntime>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sessions = runtime.sessions().reap();
            let locks = runtime.prune_idle_locks();
            if sessions > 0 || locks > 0 {
                tracing::debug!(
                    event_name = "session.reaper.swept",
                    sessions,
                    locks,
                    "reaped idle state"
                );
            }
        }
    })
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
