// Schedule Coordinator - decides when plans execute
//
// Two independent triggers feed the executor:
// - one timer per active plan, sleeping until the plan's next execution time
// - a periodic sweep over the store for active plans whose
//   next_execution_time has passed
//
// Timers are process-local and vanish on restart. The persisted
// next_execution_time is the source of truth, so the sweep (which also runs
// once at startup) reconciles anything a timer missed. Both triggers go
// through the in-flight guard and re-check the plan after acquiring it, so a
// plan that both decide is due still settles once.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::guard::InFlightGuard;
use crate::error::{AppError, AppResult, PlanError};
use crate::execution::executor::SettlementExecutor;
use crate::plan::models::SavingPlan;
use crate::plan::repository::PlanStore;
use crate::plan::schedule::next_fire_time;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Period of the reconciliation sweep
    pub sweep_interval: Duration,
    /// Spawn one timer per active plan; with this off the sweep alone drives
    /// execution (a polling loop)
    pub per_plan_timers: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(3600),
            per_plan_timers: true,
        }
    }
}

/// What caused an execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Sweep,
    Manual,
}

/// Why a scheduled attempt did not execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InFlight,
    Inactive,
    NotDue,
    Missing,
}

/// Outcome of one scheduled attempt. Scheduled attempts never return errors;
/// failures are logged and counted.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledRun {
    Executed(Box<SavingPlan>),
    Skipped(SkipReason),
    Failed(String),
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub due: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Dispatch {
    Executed(SavingPlan),
    Skipped(SkipReason),
}

pub struct ScheduleCoordinator {
    config: ScheduleConfig,
    store: Arc<dyn PlanStore>,
    executor: Arc<SettlementExecutor>,
    guard: InFlightGuard,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleCoordinator {
    pub fn new(
        config: ScheduleConfig,
        store: Arc<dyn PlanStore>,
        executor: Arc<SettlementExecutor>,
    ) -> Self {
        Self {
            config,
            store,
            executor,
            guard: InFlightGuard::new(),
            timers: Mutex::new(HashMap::new()),
            sweep_task: Mutex::new(None),
        }
    }

    /// Register a timer for every active plan and start the sweep.
    /// Returns the number of plans loaded.
    pub async fn initialize(self: &Arc<Self>) -> AppResult<usize> {
        let plans = self.store.find_active_plans().await?;
        info!("⏰ Loading {} active plans", plans.len());

        for plan in &plans {
            self.register_plan(plan);
        }

        self.start_sweep();
        info!(
            "✓ Coordinator initialized (sweep every {:?}, per-plan timers: {})",
            self.config.sweep_interval, self.config.per_plan_timers
        );
        Ok(plans.len())
    }

    /// Stop every timer and the sweep. In-flight executions are not awaited.
    pub fn shutdown(&self) {
        if let Some(sweep) = self.sweep_task.lock().take() {
            sweep.abort();
        }
        let mut timers = self.timers.lock();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        info!("Coordinator shut down");
    }

    /// Create or replace the timer for one plan
    pub fn register_plan(self: &Arc<Self>, plan: &SavingPlan) {
        if !self.config.per_plan_timers || !plan.is_active {
            return;
        }

        let handle = tokio::spawn(Self::run_plan_timer(
            Arc::downgrade(self),
            plan.pool_id.clone(),
            plan.next_execution_time,
        ));

        if let Some(previous) = self.timers.lock().insert(plan.pool_id.clone(), handle) {
            previous.abort();
        }
        debug!("Timer registered for pool {} (next {})", plan.pool_id, plan.next_execution_time);
    }

    /// Cancel the pending timer for one plan. An execution already in flight
    /// runs to completion.
    pub fn unregister_plan(&self, pool_id: &str) -> bool {
        match self.timers.lock().remove(pool_id) {
            Some(handle) => {
                handle.abort();
                debug!("Timer removed for pool {}", pool_id);
                true
            }
            None => false,
        }
    }

    pub fn registered_plans(&self) -> Vec<String> {
        let mut pools: Vec<String> = self.timers.lock().keys().cloned().collect();
        pools.sort();
        pools
    }

    pub fn is_in_flight(&self, pool_id: &str) -> bool {
        self.guard.is_in_flight(pool_id)
    }

    /// Run every due plan concurrently and report what happened
    #[instrument(skip(self))]
    pub async fn sweep(self: &Arc<Self>, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let due = self.store.find_due_plans(now).await?;
        let mut report = SweepReport {
            due: due.len(),
            ..SweepReport::default()
        };

        self.executor.plan_locks().prune();

        if due.is_empty() {
            debug!("✓ No plans due");
            return Ok(report);
        }

        info!("📊 Found {} due plans", due.len());

        let runs = due.into_iter().map(|plan| {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_scheduled(&plan.pool_id, Trigger::Sweep, now).await })
        });

        for result in futures::future::join_all(runs).await {
            match result {
                Ok(ScheduledRun::Executed(_)) => report.executed += 1,
                Ok(ScheduledRun::Skipped(_)) => report.skipped += 1,
                Ok(ScheduledRun::Failed(_)) => report.failed += 1,
                Err(e) => {
                    error!("❌ Sweep execution task aborted: {:?}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "✓ Sweep completed: {} due, {} executed, {} skipped, {} failed",
            report.due, report.executed, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Timer or sweep attempt. Errors are logged here and never propagate.
    pub async fn run_scheduled(&self, pool_id: &str, trigger: Trigger, now: DateTime<Utc>) -> ScheduledRun {
        match self.dispatch(pool_id, trigger, now).await {
            Ok(Dispatch::Executed(plan)) => ScheduledRun::Executed(Box::new(plan)),
            Ok(Dispatch::Skipped(reason)) => {
                debug!("⏭️ {:?} attempt for pool {} skipped: {:?}", trigger, pool_id, reason);
                ScheduledRun::Skipped(reason)
            }
            Err(e) => {
                error!("❌ {:?} execution for pool {} failed: {}", trigger, pool_id, e);
                ScheduledRun::Failed(e.to_string())
            }
        }
    }

    /// Out-of-schedule execution requested by a caller. Ignores
    /// `next_execution_time` but still rejects stopped and in-flight plans.
    pub async fn execute_now(&self, pool_id: &str, now: DateTime<Utc>) -> AppResult<SavingPlan> {
        match self.dispatch(pool_id, Trigger::Manual, now).await? {
            Dispatch::Executed(plan) => Ok(plan),
            Dispatch::Skipped(SkipReason::InFlight) => {
                Err(PlanError::ExecutionInFlight(pool_id.to_string()).into())
            }
            Dispatch::Skipped(SkipReason::Inactive) => Err(PlanError::NotActive(pool_id.to_string()).into()),
            Dispatch::Skipped(SkipReason::Missing) => {
                Err(AppError::NotFound(format!("Plan for pool {} not found", pool_id)))
            }
            Dispatch::Skipped(SkipReason::NotDue) => Err(AppError::Internal(
                "manual execution is never gated on due time".to_string(),
            )),
        }
    }

    #[instrument(skip(self), fields(pool_id = %pool_id))]
    async fn dispatch(&self, pool_id: &str, trigger: Trigger, now: DateTime<Utc>) -> AppResult<Dispatch> {
        let Some(_permit) = self.guard.try_acquire(pool_id) else {
            return Ok(Dispatch::Skipped(SkipReason::InFlight));
        };

        // Fresh read under the permit: another trigger may have just
        // executed this plan or the owner may have stopped it.
        let Some(plan) = self.store.find_by_pool_id(pool_id).await? else {
            return Ok(Dispatch::Skipped(SkipReason::Missing));
        };
        if !plan.is_active {
            return Ok(Dispatch::Skipped(SkipReason::Inactive));
        }
        if trigger != Trigger::Manual && !plan.is_due(now) {
            return Ok(Dispatch::Skipped(SkipReason::NotDue));
        }

        let executed = self.executor.execute(&plan, now).await?;
        Ok(Dispatch::Executed(executed))
    }

    fn start_sweep(self: &Arc<Self>) {
        let coordinator = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // First tick completes immediately: startup reconciliation
                ticker.tick().await;
                let Some(this) = coordinator.upgrade() else { break };

                info!("🔄 Starting sweep");
                if let Err(e) = this.sweep(Utc::now()).await {
                    error!("❌ Sweep failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.sweep_task.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn run_plan_timer(coordinator: Weak<Self>, pool_id: String, mut fire_at: DateTime<Utc>) {
        loop {
            let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let Some(this) = coordinator.upgrade() else { break };
            let fired_at = Utc::now();
            let run = this.run_scheduled(&pool_id, Trigger::Timer, fired_at).await;

            match this.store.find_by_pool_id(&pool_id).await {
                Ok(Some(plan)) if plan.is_active => {
                    fire_at = rearm_at(&run, &plan, fired_at);
                }
                Ok(_) => {
                    debug!("Timer for pool {} exiting: plan stopped or gone", pool_id);
                    break;
                }
                Err(e) => {
                    warn!("⚠️ Timer for pool {} could not reload plan: {}", pool_id, e);
                    fire_at = fired_at + chrono::Duration::from_std(this.config.sweep_interval)
                        .unwrap_or_else(|_| chrono::Duration::hours(1));
                }
            }
        }
    }
}

/// Back-off while another trigger holds the plan
const IN_FLIGHT_RETRY_SECS: i64 = 5;

/// When a plan timer fires next, given the outcome of the run it just made
/// and the plan as stored afterwards.
///
/// - Executed or not yet due: at the stored `next_execution_time`, which
///   already accounts for manual and sweep executions.
/// - Failed: the plan is still due, so wait a full window from the failed
///   attempt instead of spinning; the sweep retries in between.
/// - In flight elsewhere: shortly after, to pick up the outcome.
fn rearm_at(run: &ScheduledRun, plan: &SavingPlan, fired_at: DateTime<Utc>) -> DateTime<Utc> {
    match run {
        ScheduledRun::Failed(_) => plan
            .next_execution_time
            .max(next_fire_time(plan.interval, fired_at)),
        ScheduledRun::Skipped(SkipReason::InFlight) => plan
            .next_execution_time
            .max(fired_at + chrono::Duration::seconds(IN_FLIGHT_RETRY_SECS)),
        ScheduledRun::Executed(_) | ScheduledRun::Skipped(_) => plan.next_execution_time,
    }
}

impl Drop for ScheduleCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{utc, Harness, Script};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_sweep_executes_missed_plan_once_from_now() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;

        let report = h.coordinator.sweep(utc(2024, 1, 5)).await.unwrap();

        assert_eq!(report, SweepReport { due: 1, executed: 1, skipped: 0, failed: 0 });
        let plan = h.stored("pool-1").await;
        assert_eq!(plan.last_execution_time, utc(2024, 1, 5));
        assert_eq!(plan.next_execution_time, utc(2024, 1, 6));
        assert_eq!(plan.transactions.len(), 2);
        assert_eq!(h.settlement.deposit_calls(), 1);
    }

    #[tokio::test]
    async fn test_sweep_ignores_stopped_plans() {
        let h = Harness::new();
        let plan = h.seed_plan("pool-1", utc(2024, 1, 1)).await;
        h.store.save(&plan.stop(utc(2024, 1, 1)).unwrap()).await.unwrap();

        let report = h.coordinator.sweep(utc(2024, 2, 1)).await.unwrap();

        assert_eq!(report.due, 0);
        assert_eq!(h.stored("pool-1").await.transactions.len(), 1);
        assert_eq!(h.settlement.deposit_calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_in_one_plan_does_not_affect_others() {
        let h = Harness::new();
        h.seed_plan("pool-a", utc(2024, 1, 1)).await;
        let mut broken = h.seed_plan("pool-b", utc(2024, 1, 1)).await;
        broken.encrypted_signing_key = "v1:broken".to_string();
        h.store.save(&broken).await.unwrap();

        let report = h.coordinator.sweep(utc(2024, 1, 3)).await.unwrap();

        assert_eq!(report, SweepReport { due: 2, executed: 1, skipped: 0, failed: 1 });
        assert_eq!(h.stored("pool-a").await.next_execution_time, utc(2024, 1, 4));
        let still_due = h.stored("pool-b").await;
        assert!(still_due.is_active);
        assert_eq!(still_due.next_execution_time, utc(2024, 1, 2));
    }

    #[tokio::test]
    async fn test_failed_settlement_is_retried_by_next_sweep() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;
        h.settlement.set_script(Script::Reject("reverted".to_string()));

        let first = h.coordinator.sweep(utc(2024, 1, 2)).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(h.stored("pool-1").await.last_execution_time, utc(2024, 1, 1));

        h.settlement.set_script(Script::Succeed);
        let second = h.coordinator.sweep(utc(2024, 1, 2)).await.unwrap();
        assert_eq!(second.executed, 1);
        assert_eq!(h.stored("pool-1").await.next_execution_time, utc(2024, 1, 3));
    }

    #[tokio::test]
    async fn test_concurrent_timer_and_sweep_settle_once() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;
        h.settlement.set_delay(Duration::from_millis(50));
        let now = utc(2024, 1, 2);

        let (timer, sweep) = tokio::join!(
            h.coordinator.run_scheduled("pool-1", Trigger::Timer, now),
            h.coordinator.sweep(now),
        );

        let sweep = sweep.unwrap();
        let executions = usize::from(matches!(timer, ScheduledRun::Executed(_))) + sweep.executed;
        assert_eq!(executions, 1);
        assert_eq!(h.settlement.deposit_calls(), 1);
        assert_eq!(h.stored("pool-1").await.transactions.len(), 2);
    }

    #[tokio::test]
    async fn test_sequential_triggers_after_execution_are_not_due() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;
        let now = utc(2024, 1, 2);

        let first = h.coordinator.run_scheduled("pool-1", Trigger::Timer, now).await;
        let second = h.coordinator.run_scheduled("pool-1", Trigger::Sweep, now).await;

        assert!(matches!(first, ScheduledRun::Executed(_)));
        assert_eq!(second, ScheduledRun::Skipped(SkipReason::NotDue));
        assert_eq!(h.settlement.deposit_calls(), 1);
    }

    #[tokio::test]
    async fn test_execute_now_ignores_due_time_but_not_state() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;

        let executed = h.coordinator.execute_now("pool-1", utc(2024, 1, 1)).await.unwrap();
        assert_eq!(executed.total_amount, dec!(110));

        h.store.save(&executed.stop(utc(2024, 1, 1)).unwrap()).await.unwrap();
        let err = h.coordinator.execute_now("pool-1", utc(2024, 1, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Plan(PlanError::NotActive(_))));

        let err = h.coordinator.execute_now("ghost", utc(2024, 1, 1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_execute_now_rejected_while_in_flight() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;
        h.settlement.set_delay(Duration::from_millis(50));

        let (scheduled, manual) = tokio::join!(
            h.coordinator.run_scheduled("pool-1", Trigger::Timer, utc(2024, 1, 2)),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.coordinator.execute_now("pool-1", utc(2024, 1, 2)).await
            },
        );

        assert!(matches!(scheduled, ScheduledRun::Executed(_)));
        assert!(matches!(manual, Err(AppError::Plan(PlanError::ExecutionInFlight(_)))));
        assert!(!h.coordinator.is_in_flight("pool-1"));
    }

    #[tokio::test]
    async fn test_initialize_registers_active_plans_and_shutdown_clears() {
        let h = Harness::with_timers();
        h.seed_plan_at("pool-a", Utc::now()).await;
        let stopped = h.seed_plan_at("pool-b", Utc::now()).await;
        h.store.save(&stopped.stop(Utc::now()).unwrap()).await.unwrap();

        let loaded = h.coordinator.initialize().await.unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(h.coordinator.registered_plans(), vec!["pool-a".to_string()]);
        assert!(h.coordinator.unregister_plan("pool-a"));
        assert!(!h.coordinator.unregister_plan("pool-a"));

        h.coordinator.shutdown();
        assert!(h.coordinator.registered_plans().is_empty());
    }

    #[tokio::test]
    async fn test_overdue_plan_timer_fires_immediately() {
        let h = Harness::with_timers();
        let plan = h.seed_plan_at("pool-1", Utc::now() - chrono::Duration::days(2)).await;

        h.coordinator.register_plan(&plan);

        let settled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if h.stored("pool-1").await.transactions.len() == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(settled.is_ok(), "timer never executed the overdue plan");
        assert!(h.stored("pool-1").await.next_execution_time > Utc::now());
        h.coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_timer_rearms_at_next_execution_after_manual_run() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;
        let midday = utc(2024, 1, 1) + chrono::Duration::hours(12);

        h.coordinator.execute_now("pool-1", midday).await.unwrap();

        // The timer armed for the original schedule now finds nothing due.
        let run = h.coordinator.run_scheduled("pool-1", Trigger::Timer, utc(2024, 1, 2)).await;
        assert_eq!(run, ScheduledRun::Skipped(SkipReason::NotDue));

        let plan = h.stored("pool-1").await;
        assert_eq!(rearm_at(&run, &plan, utc(2024, 1, 2)), utc(2024, 1, 2) + chrono::Duration::hours(12));
    }

    #[tokio::test]
    async fn test_timer_rearms_at_advanced_window_after_execution() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;

        let run = h.coordinator.run_scheduled("pool-1", Trigger::Timer, utc(2024, 1, 2)).await;
        assert!(matches!(run, ScheduledRun::Executed(_)));

        let plan = h.stored("pool-1").await;
        assert_eq!(rearm_at(&run, &plan, utc(2024, 1, 2)), utc(2024, 1, 3));
    }

    #[tokio::test]
    async fn test_timer_waits_a_window_after_failure() {
        let h = Harness::new();
        h.seed_plan("pool-1", utc(2024, 1, 1)).await;
        h.settlement.set_script(Script::Reject("reverted".to_string()));

        let run = h.coordinator.run_scheduled("pool-1", Trigger::Timer, utc(2024, 1, 2)).await;
        assert!(matches!(run, ScheduledRun::Failed(_)));

        let plan = h.stored("pool-1").await;
        assert_eq!(plan.next_execution_time, utc(2024, 1, 2));
        assert_eq!(rearm_at(&run, &plan, utc(2024, 1, 2)), utc(2024, 1, 3));
    }

    #[test]
    fn test_timer_backs_off_briefly_while_in_flight() {
        let plan = crate::testing::sample_plan("pool-1", utc(2024, 1, 1));
        let run = ScheduledRun::Skipped(SkipReason::InFlight);

        assert_eq!(
            rearm_at(&run, &plan, utc(2024, 1, 2)),
            utc(2024, 1, 2) + chrono::Duration::seconds(IN_FLIGHT_RETRY_SECS)
        );
    }
}
