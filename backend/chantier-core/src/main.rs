// src/main.rs
use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chantier_core::api::{router, AppState};
use chantier_core::closure::SystemClock;
use chantier_core::config::Config;
use chantier_core::export::CsvArtifactGenerator;
use chantier_core::store::InMemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load CHANTIER_* configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting timesheet server");
    info!(
        "Overtime policy: {}h normal, 25% tier up to {}h. Exports go to {}",
        config.weekly_normal_hours,
        config.overtime_tier1_ceiling,
        config.export_dir.display()
    );

    // --- Shared State ---
    let store = Arc::new(InMemoryStore::new());
    let state = AppState::new(
        store,
        config.overtime_policy(),
        Arc::new(CsvArtifactGenerator::new(config.export_dir.clone())),
        Arc::new(SystemClock),
    );

    // --- Serve ---
    let app = router(state);
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
