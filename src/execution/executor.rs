use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::chain::{DepositReceipt, PoolState, SettlementLayer};
use crate::error::{AppError, AppResult};
use crate::ledger::{DepositType, TransactionEntry};
use crate::plan::models::SavingPlan;
use crate::plan::repository::PlanStore;
use crate::settlement::guard::PlanLocks;
use crate::wallet::custody::KeyCustody;

/// Performs exactly one due execution for one plan:
///
/// 1. decrypt the signing secret
/// 2. apply the recurring deposit
/// 3. read back the pool balance
/// 4. append a confirmed ledger entry
/// 5. advance the execution window and persist
///
/// If step 2 or 3 fails nothing is written, so the plan stays due and the
/// next timer or sweep fire retries it. A failure never deactivates a plan.
pub struct SettlementExecutor {
    store: Arc<dyn PlanStore>,
    custody: Arc<dyn KeyCustody>,
    settlement: Arc<dyn SettlementLayer>,
    locks: PlanLocks,
}

impl SettlementExecutor {
    pub fn new(
        store: Arc<dyn PlanStore>,
        custody: Arc<dyn KeyCustody>,
        settlement: Arc<dyn SettlementLayer>,
        locks: PlanLocks,
    ) -> Self {
        Self {
            store,
            custody,
            settlement,
            locks,
        }
    }

    /// Write locks shared with every other writer of stored plans
    pub fn plan_locks(&self) -> &PlanLocks {
        &self.locks
    }

    /// Callers must hold the in-flight permit for `plan.pool_id`.
    #[instrument(skip(self, plan), fields(pool_id = %plan.pool_id, amount = %plan.periodic_amount))]
    pub async fn execute(&self, plan: &SavingPlan, now: DateTime<Utc>) -> AppResult<SavingPlan> {
        info!(
            "🔄 Executing {} deposit of {} {}",
            plan.interval, plan.periodic_amount, plan.token_symbol
        );

        let (receipt, pool) = match self.settle(plan).await {
            Ok(settled) => settled,
            Err(e) => {
                match &e {
                    AppError::Custody(_) => error!(
                        "❌ Signing key for pool {} could not be used, manual intervention required: {}",
                        plan.pool_id, e
                    ),
                    _ => warn!(
                        "⚠️ Settlement for pool {} failed, will retry on next fire: {}",
                        plan.pool_id, e
                    ),
                }
                return Err(e);
            }
        };

        let entry = TransactionEntry::confirmed(
            receipt.tx_ref.clone(),
            plan.periodic_amount,
            DepositType::Update,
            pool.amount_saved,
            now,
        );

        // Re-read under the write lock so owner actions taken while the
        // transfer was in flight (stop, amount change) are kept.
        let recorded = self.record(&plan.pool_id, entry, now).await.map_err(|e| {
            error!(
                "❌ Deposit {} for pool {} settled but could not be recorded: {}",
                receipt.tx_ref, plan.pool_id, e
            );
            e
        })?;

        if !recorded.is_active {
            info!("Plan for pool {} was stopped during execution; deposit still recorded", plan.pool_id);
        }

        info!(
            "✓ Deposit settled (tx: {}), pool balance {}, next execution {}",
            receipt.tx_ref, pool.amount_saved, recorded.next_execution_time
        );

        Ok(recorded)
    }

    async fn settle(&self, plan: &SavingPlan) -> AppResult<(DepositReceipt, PoolState)> {
        let receipt = {
            let signer = self.custody.decrypt(&plan.encrypted_signing_key).await?;
            self.settlement
                .apply_recurring_deposit(&plan.pool_id, plan.periodic_amount, &plan.token_ref, &signer)
                .await?
        };

        let pool = self.settlement.get_pool(&plan.pool_id).await?;
        Ok((receipt, pool))
    }

    async fn record(
        &self,
        pool_id: &str,
        entry: TransactionEntry,
        now: DateTime<Utc>,
    ) -> AppResult<SavingPlan> {
        let _write = self.locks.lock(pool_id).await;
        let latest = self
            .store
            .find_by_pool_id(pool_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Plan for pool {} not found", pool_id)))?;

        let updated = latest.record_execution(entry, now);
        self.store.save(&updated).await?;
        Ok(updated)
    }
}
