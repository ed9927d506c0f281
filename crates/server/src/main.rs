mod bootstrap;
mod enrichment;
mod health;
mod notify;
mod routes;

use std::time::Duration;

use anyhow::Result;
use hearth_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use hearth_core::config::LogFormat::*;
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
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    // Bootstrap using the same config we already loaded
    let app = bootstrap::bootstrap_with_config(config).await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let shutdown_grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        model = %app.config.model.name,
        tools = app.orchestrator.catalog().len(),
        "hearth-server started"
    );

    axum::serve(listener, routes::router(app.orchestrator))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_grace))
        .await?;

    tracing::info!(event_name = "system.server.stopping", "hearth-server stopping");

    Ok(())
}

/// Resolves on ctrl-c. In-flight requests then get `grace` to finish before
/// the process is torn down regardless.
async fn wait_for_shutdown(grace: Duration) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "could not listen for shutdown signal");
        return;
    }
    tracing::info!(
        event_name = "system.server.shutdown_signal",
        grace_secs = grace.as_secs(),
        "shutdown signal received, draining requests"
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::warn!(
            event_name = "system.server.shutdown_forced",
            "graceful shutdown window elapsed, exiting"
        );
        std::process::exit(1);
    });
}
