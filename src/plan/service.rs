use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::models::{CreatePlanRequest, SavingPlan};
use super::repository::PlanStore;
use crate::error::{AppError, AppResult, PlanError};
use crate::execution::chain::{OpenPoolRequest, SettlementLayer};
use crate::ledger::{DepositType, TransactionEntry};
use crate::settlement::guard::PlanLocks;
use crate::settlement::scheduler::ScheduleCoordinator;
use crate::wallet::custody::{KeyCustody, SigningSecret};

/// Owner-facing plan operations. Every mutation is computed on a fresh
/// snapshot under the pool's write lock, persisted, and then reflected in the
/// coordinator's timers.
pub struct PlanService {
    store: Arc<dyn PlanStore>,
    custody: Arc<dyn KeyCustody>,
    settlement: Arc<dyn SettlementLayer>,
    coordinator: Arc<ScheduleCoordinator>,
    locks: PlanLocks,
}

impl PlanService {
    pub fn new(
        store: Arc<dyn PlanStore>,
        custody: Arc<dyn KeyCustody>,
        settlement: Arc<dyn SettlementLayer>,
        coordinator: Arc<ScheduleCoordinator>,
        locks: PlanLocks,
    ) -> Self {
        Self {
            store,
            custody,
            settlement,
            coordinator,
            locks,
        }
    }

    pub async fn get_plan(&self, pool_id: &str) -> AppResult<SavingPlan> {
        self.store
            .find_by_pool_id(pool_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Plan for pool {} not found", pool_id)))
    }

    pub async fn create_plan(&self, request: CreatePlanRequest, signer: SigningSecret) -> AppResult<SavingPlan> {
        self.create_plan_at(request, signer, Utc::now()).await
    }

    /// Open the pool with the initial deposit and persist the plan around it.
    /// The plan only exists once the opening deposit has been confirmed.
    #[instrument(skip(self, request, signer), fields(owner = %request.owner_ref))]
    pub async fn create_plan_at(
        &self,
        request: CreatePlanRequest,
        signer: SigningSecret,
        now: DateTime<Utc>,
    ) -> AppResult<SavingPlan> {
        let config = request.into_config()?;

        let encrypted = self.custody.encrypt(&signer).await?;
        let token_symbol = self.settlement.get_token_symbol(&config.token_ref).await?;

        let open = OpenPoolRequest {
            token_ref: config.token_ref.clone(),
            amount: config.initial_amount,
            reason: config.reason.clone(),
            lock_type: config.lock_type,
            duration: config.duration,
        };
        let receipt = self.settlement.open_pool(&open, &signer).await?;
        drop(signer);

        let pool_amount = match self.settlement.get_pool(&receipt.pool_id).await {
            Ok(pool) => pool.amount_saved,
            Err(e) => {
                warn!(
                    "⚠️ Pool {} opened but balance unavailable, assuming initial deposit: {}",
                    receipt.pool_id, e
                );
                config.initial_amount
            }
        };

        let opening = TransactionEntry::confirmed(
            receipt.tx_ref.clone(),
            config.initial_amount,
            DepositType::Save,
            pool_amount,
            now,
        );
        let plan = SavingPlan::open(config, receipt.pool_id, token_symbol, encrypted, opening, now);

        self.store.insert(&plan).await?;
        self.coordinator.register_plan(&plan);

        info!(
            "✅ Plan {} created for pool {} ({} {} {}, next {})",
            plan.plan_id,
            plan.pool_id,
            plan.periodic_amount,
            plan.token_symbol,
            plan.interval,
            plan.next_execution_time
        );
        Ok(plan)
    }

    /// ACTIVE -> STOPPED. The pending timer is cancelled at once; an
    /// execution already in flight still completes and is recorded.
    #[instrument(skip(self))]
    pub async fn stop_plan(&self, pool_id: &str) -> AppResult<SavingPlan> {
        self.coordinator.unregister_plan(pool_id);

        let _write = self.locks.lock(pool_id).await;
        let stopped = match self.transition(pool_id, |plan| plan.stop(Utc::now())).await {
            Ok(stopped) => stopped,
            Err(e) => {
                if let Ok(current) = self.get_plan(pool_id).await {
                    self.coordinator.register_plan(&current);
                }
                return Err(e);
            }
        };
        self.coordinator.unregister_plan(pool_id);

        info!("⏸️ Plan for pool {} stopped", pool_id);
        Ok(stopped)
    }

    /// STOPPED -> ACTIVE. An elapsed next execution time fires right away.
    #[instrument(skip(self))]
    pub async fn resume_plan(&self, pool_id: &str) -> AppResult<SavingPlan> {
        let _write = self.locks.lock(pool_id).await;
        let resumed = self.transition(pool_id, |plan| plan.resume(Utc::now())).await?;
        self.coordinator.register_plan(&resumed);

        info!(
            "▶️ Plan for pool {} resumed (next {})",
            pool_id, resumed.next_execution_time
        );
        Ok(resumed)
    }

    #[instrument(skip(self))]
    pub async fn update_amount(&self, pool_id: &str, amount: Decimal) -> AppResult<SavingPlan> {
        let _write = self.locks.lock(pool_id).await;
        let updated = self
            .transition(pool_id, |plan| plan.with_periodic_amount(amount, Utc::now()))
            .await?;

        info!("Plan for pool {} periodic amount set to {}", pool_id, amount);
        Ok(updated)
    }

    pub async fn manual_execute(&self, pool_id: &str) -> AppResult<SavingPlan> {
        self.manual_execute_at(pool_id, Utc::now()).await
    }

    /// Execute now regardless of schedule. Rejected for unknown, stopped or
    /// in-flight plans; settlement failures are returned to the caller.
    #[instrument(skip(self))]
    pub async fn manual_execute_at(&self, pool_id: &str, now: DateTime<Utc>) -> AppResult<SavingPlan> {
        self.coordinator.execute_now(pool_id, now).await
    }

    /// Load, transition and save. Callers hold the pool's write lock.
    async fn transition<F>(&self, pool_id: &str, apply: F) -> AppResult<SavingPlan>
    where
        F: FnOnce(&SavingPlan) -> Result<SavingPlan, PlanError>,
    {
        let plan = self.get_plan(pool_id).await?;
        let next = apply(&plan)?;
        self.store.save(&next).await?;
        Ok(next)
    }
}
