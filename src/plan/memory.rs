use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::models::SavingPlan;
use super::repository::PlanStore;
use crate::error::{AppError, AppResult, PlanError};

/// Process-local plan store keyed by pool id. Used for dry runs and tests;
/// nothing survives a restart.
pub struct InMemoryPlanStore {
    plans: tokio::sync::RwLock<HashMap<String, SavingPlan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self {
            plans: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plans.read().await.is_empty()
    }
}

impl Default for InMemoryPlanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn find_active_plans(&self) -> AppResult<Vec<SavingPlan>> {
        let plans = self.plans.read().await;
        let mut active: Vec<SavingPlan> = plans.values().filter(|p| p.is_active).cloned().collect();
        active.sort_by_key(|p| p.created_at);
        Ok(active)
    }

    async fn find_due_plans(&self, now: DateTime<Utc>) -> AppResult<Vec<SavingPlan>> {
        let plans = self.plans.read().await;
        let mut due: Vec<SavingPlan> = plans.values().filter(|p| p.is_due(now)).cloned().collect();
        due.sort_by_key(|p| p.next_execution_time);
        Ok(due)
    }

    async fn find_by_pool_id(&self, pool_id: &str) -> AppResult<Option<SavingPlan>> {
        let plans = self.plans.read().await;
        Ok(plans.get(pool_id).cloned())
    }

    async fn insert(&self, plan: &SavingPlan) -> AppResult<()> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.pool_id) {
            return Err(PlanError::DuplicatePool(plan.pool_id.clone()).into());
        }
        plans.insert(plan.pool_id.clone(), plan.clone());
        Ok(())
    }

    async fn save(&self, plan: &SavingPlan) -> AppResult<()> {
        let mut plans = self.plans.write().await;
        let stored = plans
            .get_mut(&plan.pool_id)
            .ok_or_else(|| AppError::NotFound(format!("Plan for pool {} not found", plan.pool_id)))?;
        *stored = plan.clone();
        Ok(())
    }
}
