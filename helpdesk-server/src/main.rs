use anyhow::{Context, Result};
use helpdesk_server::clock::SystemClock;
use helpdesk_server::config::Config;
use helpdesk_server::state_machine::SqliteRepository;
use helpdesk_server::{api, build_channels, build_help_desk, get_version, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = %get_version(), "Starting help desk server");

    let config = Config::from_env().context("Failed to load configuration")?;

    let routing = config.load_routing_config()?;

    let db_path = config.database_path();
    info!("Using state database: {}", db_path.display());
    let repo = SqliteRepository::new(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let channels = build_channels(&config)?;
    if channels.is_empty() {
        warn!("No notification channels enabled; supervisors will not be notified");
    }

    let help_desk = build_help_desk(
        Arc::new(repo),
        routing,
        channels,
        config.retry_policy(),
        Arc::new(SystemClock),
    )?;
    let state = Arc::new(AppState::new(help_desk));

    let app = api::router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
