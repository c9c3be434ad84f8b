use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::{BigDecimal, Json};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use super::models::SavingPlan;
use crate::error::{AppError, AppResult, PlanError};
use crate::ledger::{TransactionEntry, TransactionLedger};

/// Durable persistence of plans and their embedded ledgers
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn find_active_plans(&self) -> AppResult<Vec<SavingPlan>>;

    /// Active plans whose `next_execution_time <= now`
    async fn find_due_plans(&self, now: DateTime<Utc>) -> AppResult<Vec<SavingPlan>>;

    async fn find_by_pool_id(&self, pool_id: &str) -> AppResult<Option<SavingPlan>>;

    /// Insert a new plan. Fails with `PlanError::DuplicatePool` if the pool
    /// is already bound to a plan.
    async fn insert(&self, plan: &SavingPlan) -> AppResult<()>;

    /// Overwrite the stored plan with the same `pool_id`
    async fn save(&self, plan: &SavingPlan) -> AppResult<()>;
}

const PLAN_COLUMNS: &str = r#"
    plan_id, pool_id, owner_ref, token_ref, token_symbol,
    initial_amount, periodic_amount, reason, lock_type, duration_secs, schedule_interval,
    is_active, last_execution_time, next_execution_time, encrypted_signing_key,
    total_amount, transactions, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct PlanRow {
    plan_id: Uuid,
    pool_id: String,
    owner_ref: String,
    token_ref: String,
    token_symbol: String,
    initial_amount: BigDecimal,
    periodic_amount: BigDecimal,
    reason: String,
    lock_type: String,
    duration_secs: i64,
    schedule_interval: String,
    is_active: bool,
    last_execution_time: DateTime<Utc>,
    next_execution_time: DateTime<Utc>,
    encrypted_signing_key: String,
    total_amount: BigDecimal,
    transactions: Json<Vec<TransactionEntry>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for SavingPlan {
    type Error = AppError;

    fn try_from(row: PlanRow) -> AppResult<Self> {
        Ok(SavingPlan {
            plan_id: row.plan_id,
            pool_id: row.pool_id,
            owner_ref: row.owner_ref,
            token_ref: row.token_ref,
            token_symbol: row.token_symbol,
            initial_amount: to_decimal(&row.initial_amount)?,
            periodic_amount: to_decimal(&row.periodic_amount)?,
            reason: row.reason,
            lock_type: row.lock_type.parse()?,
            duration: duration_from_column(row.duration_secs)?,
            interval: row.schedule_interval.parse()?,
            is_active: row.is_active,
            last_execution_time: row.last_execution_time,
            next_execution_time: row.next_execution_time,
            encrypted_signing_key: row.encrypted_signing_key,
            total_amount: to_decimal(&row.total_amount)?,
            transactions: TransactionLedger::from_entries(row.transactions.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_decimal(value: &BigDecimal) -> AppResult<Decimal> {
    Ok(Decimal::from_str(&value.to_string())?)
}

fn duration_from_column(secs: i64) -> AppResult<u64> {
    u64::try_from(secs).map_err(|_| AppError::Internal(format!("Stored lock duration {} is negative", secs)))
}

fn duration_to_column(secs: u64) -> AppResult<i64> {
    Ok(i64::try_from(secs).map_err(|_| PlanError::InvalidDuration(secs))?)
}

fn to_big(value: Decimal) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| AppError::InvalidInput(format!("Decimal conversion error: {:?}", e)))
}

/// Postgres-backed plan store
pub struct PgPlanStore {
    pub pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn into_plans(rows: Vec<PlanRow>) -> AppResult<Vec<SavingPlan>> {
        rows.into_iter().map(SavingPlan::try_from).collect()
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn find_active_plans(&self) -> AppResult<Vec<SavingPlan>> {
        let rows = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM saving_plans WHERE is_active = TRUE ORDER BY created_at",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::into_plans(rows)
    }

    async fn find_due_plans(&self, now: DateTime<Utc>) -> AppResult<Vec<SavingPlan>> {
        let rows = sqlx::query_as::<_, PlanRow>(&format!(
            r#"
            SELECT {} FROM saving_plans
            WHERE is_active = TRUE AND next_execution_time <= $1
            ORDER BY next_execution_time
            "#,
            PLAN_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Self::into_plans(rows)
    }

    async fn find_by_pool_id(&self, pool_id: &str) -> AppResult<Option<SavingPlan>> {
        let row = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM saving_plans WHERE pool_id = $1",
            PLAN_COLUMNS
        ))
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SavingPlan::try_from).transpose()
    }

    async fn insert(&self, plan: &SavingPlan) -> AppResult<()> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO saving_plans ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan.plan_id)
        .bind(&plan.pool_id)
        .bind(&plan.owner_ref)
        .bind(&plan.token_ref)
        .bind(&plan.token_symbol)
        .bind(to_big(plan.initial_amount)?)
        .bind(to_big(plan.periodic_amount)?)
        .bind(&plan.reason)
        .bind(plan.lock_type.as_str())
        .bind(duration_to_column(plan.duration)?)
        .bind(plan.interval.as_str())
        .bind(plan.is_active)
        .bind(plan.last_execution_time)
        .bind(plan.next_execution_time)
        .bind(&plan.encrypted_signing_key)
        .bind(to_big(plan.total_amount)?)
        .bind(Json(plan.transactions.entries()))
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(PlanError::DuplicatePool(plan.pool_id.clone()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, plan: &SavingPlan) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE saving_plans
            SET periodic_amount = $2,
                is_active = $3,
                last_execution_time = $4,
                next_execution_time = $5,
                total_amount = $6,
                transactions = $7,
                updated_at = $8
            WHERE pool_id = $1
            "#,
        )
        .bind(&plan.pool_id)
        .bind(to_big(plan.periodic_amount)?)
        .bind(plan.is_active)
        .bind(plan.last_execution_time)
        .bind(plan.next_execution_time)
        .bind(to_big(plan.total_amount)?)
        .bind(Json(plan.transactions.entries()))
        .bind(plan.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Plan for pool {} not found", plan.pool_id)));
        }

        Ok(())
    }
}
