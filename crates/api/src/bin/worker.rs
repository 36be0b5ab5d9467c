//! Standalone worker process consuming the shared Redis queue.

use anyhow::Context;
use tracing::info;

use phonescan_api::app::services;
use phonescan_infra::{Backend, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    phonescan_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    if settings.backend != Backend::Redis {
        anyhow::bail!("the standalone worker needs PHONESCAN_BACKEND=redis");
    }

    let backends = services::Backends::from_settings(&settings)
        .await
        .context("failed to connect queue/store backend")?;
    let handle = services::build_worker(&settings, &backends)?.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested; finishing current task");

    let stats = handle.shutdown().await;
    info!(?stats, "worker exited");
    Ok(())
}
