use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use phonescan_api::app::{self, services};
use phonescan_infra::{Backend, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    phonescan_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let backends = services::Backends::from_settings(&settings)
        .await
        .context("failed to connect queue/store backend")?;

    let worker = if settings.run_worker {
        Some(services::build_worker(&settings, &backends)?.spawn())
    } else {
        if settings.backend == Backend::Memory {
            warn!("in-memory backend without an embedded worker; submitted tasks will never run");
        }
        None
    };

    let app = app::build_app(Arc::new(services::IntakeService::new(backends)));

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    info!(
        addr = %listener.local_addr()?,
        backend = ?settings.backend,
        embedded_worker = settings.run_worker,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(worker) = worker {
        let stats = worker.shutdown().await;
        info!(?stats, "embedded worker stopped");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
