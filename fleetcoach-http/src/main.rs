use std::sync::Arc;

use fleetcoach_core::{wiring, CoachConfig, CoachingOrchestrator};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = CoachConfig::load()?;
    let collab = wiring::collaborators(&cfg)?;
    let orchestrator = Arc::new(CoachingOrchestrator::new(collab, cfg.settings()));

    let app = fleetcoach_http::router(orchestrator, Some(&cfg.speech));

    let listener = TcpListener::bind(&cfg.listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "fleetcoach HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
