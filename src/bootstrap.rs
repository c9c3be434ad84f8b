use std::{sync::Arc, time::Duration};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    config::Config,
    error::AppResult,
    execution::{
        executor::SettlementExecutor,
        relay::{RelayConfig, RelaySettlementLayer},
    },
    plan::{repository::PgPlanStore, service::PlanService},
    settlement::{
        guard::PlanLocks,
        scheduler::{ScheduleConfig, ScheduleCoordinator},
    },
    wallet::custody::AesKeyCustody,
};

/// Everything the process keeps alive between startup and shutdown
pub struct AppState {
    pub pool: PgPool,
    pub plans: Arc<PlanService>,
    pub coordinator: Arc<ScheduleCoordinator>,
}

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url, config.database_max_connections).await?;
    let store = Arc::new(PgPlanStore::new(pool.clone()));

    let custody = Arc::new(AesKeyCustody::new(&config.custody_secret)?);
    info!("✅ Key custody initialized");

    let settlement = Arc::new(RelaySettlementLayer::new(RelayConfig {
        base_url: config.settlement_url.clone(),
    }));
    info!("✅ Settlement relay configured at {}", config.settlement_url);

    let locks = PlanLocks::new();
    let executor = Arc::new(SettlementExecutor::new(
        store.clone(),
        custody.clone(),
        settlement.clone(),
        locks.clone(),
    ));

    let coordinator = Arc::new(ScheduleCoordinator::new(
        ScheduleConfig {
            sweep_interval: config.sweep_interval(),
            per_plan_timers: config.per_plan_timers,
        },
        store.clone(),
        executor,
    ));

    let plans = Arc::new(PlanService::new(
        store,
        custody,
        settlement,
        coordinator.clone(),
        locks,
    ));

    info!("✓ Application components ready");
    Ok(AppState {
        pool,
        plans,
        coordinator,
    })
}

async fn initialize_database(database_url: &str, max_connections: u32) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: {} max connections", max_connections);

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
