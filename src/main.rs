use api_rest::{AppState, router};
use emr_core::{
    constants::{DEFAULT_REST_ADDR, RECONCILE_BATCH_SIZE},
    core_config_from_lookup,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the EMR coordination service
///
/// Runs two things concurrently:
/// - the REST server on port 3000 (configurable via EMR_REST_ADDR)
/// - the reconciliation job, replaying lost patient-status syncs every
///   RECONCILE_INTERVAL_SECS (default 300, `0` disables it)
///
/// # Environment Variables
/// - `EMR_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DATABASE_URL`: PostgreSQL connection string
/// - `INTAKE_SERVICE_URL`, `PATIENT_SERVICE_URL`, `PRESCRIPTION_SERVICE_URL`: downstream base URLs
/// - `REMOTE_RETRY_ATTEMPTS`, `REMOTE_RETRY_BASE_MS`: retry policy for best-effort steps
/// - `RECONCILE_INTERVAL_SECS`, `RECONCILE_AUTHORIZATION`: reconciliation schedule and credential
/// - `RECONCILE_GRACE_SECS`: how long an escalated case is left to its saga (default 600)
///
/// # Returns
/// * `Ok(())` - If the server shuts down cleanly
/// * `Err(anyhow::Error)` - If startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("emr_run=info".parse()?)
                .add_directive("emr_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = core_config_from_lookup(|name| std::env::var(name).ok())?;
    let rest_addr = std::env::var("EMR_REST_ADDR").unwrap_or_else(|_| DEFAULT_REST_ADDR.into());

    let state = AppState::connect(&cfg).await?;
    let reconciler = state.reconciler().clone();

    let reconcile_job = match cfg.reconcile_interval() {
        Some(interval) => {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "++ Starting reconciliation job"
            );
            Some(tokio::spawn(async move {
                reconciler.run_every(interval, RECONCILE_BATCH_SIZE).await;
            }))
        }
        None => {
            tracing::info!("reconciliation job disabled");
            None
        }
    };

    tracing::info!("++ Starting EMR REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await;

    // The job loops forever; it ends with the server.
    if let Some(job) = reconcile_job {
        job.abort();
    }
    served?;

    Ok(())
}
