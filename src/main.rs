use anyhow::{anyhow, Context, Result};
use smart_bulk::api::{create_router, AppState};
use smart_bulk::config::{load_config, SmartBulkConfig};
use smart_bulk::export::run_job_cleanup;
use smart_bulk::http::build_client;
use smart_bulk::oauth::run_state_cleanup;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smart_bulk=info".into()),
        )
        .init();

    info!("smart-bulk starting...");

    let mut config = match std::env::var("SMART_BULK_CONFIG") {
        Ok(path) => load_config(&path)
            .map_err(|e| anyhow!("Failed to load config from {}: {}", path, e))?,
        Err(_) => SmartBulkConfig::default(),
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    info!(
        authorize_url = %config.smart.authorize_url,
        token_url = %config.smart.token_url,
        export_endpoint = %config.export.endpoint,
        resource_types = config.export.resource_types.len(),
        "Configuration loaded"
    );

    let http_client = build_client(&config.http)?;
    let bind_address = config.server.bind_address.clone();
    let cleanup_interval = config.server.state_cleanup_interval_seconds.max(1);
    let job_retention = config.server.job_retention_seconds;
    let job_cleanup_interval = config.server.job_cleanup_interval_seconds.max(1);

    let state = AppState::new(config, http_client);
    tokio::spawn(run_state_cleanup(
        state.state_manager.clone(),
        cleanup_interval,
    ));
    tokio::spawn(run_job_cleanup(
        state.registry.clone(),
        job_retention,
        job_cleanup_interval,
    ));

    let app = create_router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!(address = %bind_address, "Listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
