//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own, without the periodic reconciliation job.
//!
//! ## Intended use
//! Useful for development and debugging when you only want the REST server (with
//! OpenAPI/Swagger UI). The workspace's main `emr-run` binary runs the server and the
//! reconciliation job concurrently.

use api_rest::{router, AppState};
use emr_core::{constants::DEFAULT_REST_ADDR, core_config_from_lookup};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the EMR REST API server
///
/// # Environment Variables
/// - `EMR_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `DATABASE_URL`, `INTAKE_SERVICE_URL`, `PATIENT_SERVICE_URL`, `PRESCRIPTION_SERVICE_URL`
/// - `REMOTE_RETRY_ATTEMPTS`, `REMOTE_RETRY_BASE_MS` (optional)
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the configuration is incomplete or invalid,
/// - the database cannot be reached, or
/// - the server address cannot be bound.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("emr_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = core_config_from_lookup(|name| std::env::var(name).ok())?;
    let addr = std::env::var("EMR_REST_ADDR").unwrap_or_else(|_| DEFAULT_REST_ADDR.into());

    tracing::info!("-- Starting EMR REST API on {}", addr);

    let state = AppState::connect(&cfg).await?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
