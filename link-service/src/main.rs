use dotenvy::dotenv;
use link_service::Application;
use link_service::config::LinkConfig;
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = LinkConfig::load()?;

    // Initialize tracing/logging using shared logic
    init_tracing(
        "link-service",
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    // Initialize metrics
    link_service::services::metrics::init_metrics();

    tracing::info!(
        environment = ?config.environment,
        "Starting link service"
    );

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}
