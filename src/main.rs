//! tierroute HTTP server
//!
//! Loads configuration, seeds the model catalog and serves the routing API.

use clap::Parser;
use std::net::SocketAddr;
use tierroute::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        match output {
            Some(path) => {
                std::fs::write(&path, generate_config_template())?;
                println!("Wrote configuration template to {}", path);
            }
            None => print!("{}", generate_config_template()),
        }
        return Ok(());
    }

    let config = std::sync::Arc::new(Config::from_file(&cli.config)?);
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        config = %cli.config,
        daily_limit = config.budget.daily_limit(),
        safety_buffer = config.budget.safety_buffer_ratio(),
        "Starting tierroute server on {}:{}",
        config.server.host,
        config.server.port
    );

    let state = AppState::new(config.clone())?;
    let catalog = state.router().catalog().clone();

    if config.catalog.discovery_url().is_some() {
        // Fail-soft: a failed first refresh leaves the configured models in place
        match catalog.refresh_now().await {
            Ok(report) => tracing::info!(
                generation = report.generation,
                models = ?report.models,
                "Initial catalog refresh complete"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                "Initial catalog refresh failed, serving configured models only"
            ),
        }
        catalog.start_background_refresh(config.catalog.refresh_interval());
    } else {
        tracing::info!(
            models = catalog.snapshot().len(),
            "No discovery_url configured, serving configured models only"
        );
    }

    let app = handlers::app(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
