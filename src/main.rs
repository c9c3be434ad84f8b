use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autosave::{bootstrap, config::Config};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,autosave=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting periodic savings scheduler");

    let config = Config::from_env().context("failed to load configuration")?;
    info!("Configuration loaded: {:?}", config);

    let state = bootstrap::initialize_app_state(&config).await?;

    let loaded = state.coordinator.initialize().await?;
    info!("⏰ Scheduler running with {} active plans", loaded);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("🛑 Shutdown signal received");
    state.coordinator.shutdown();
    state.pool.close().await;

    info!("👋 Stopped");
    Ok(())
}
