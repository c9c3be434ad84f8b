// Shared fixtures for unit tests: a scripted settlement layer and a fully
// wired in-memory service stack.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppResult, SettlementError};
use crate::execution::chain::{DepositReceipt, OpenPoolReceipt, OpenPoolRequest, PoolState, SettlementLayer};
use crate::execution::executor::SettlementExecutor;
use crate::ledger::{DepositType, TransactionEntry};
use crate::plan::memory::InMemoryPlanStore;
use crate::plan::models::{CreatePlanRequest, SavingPlan};
use crate::plan::repository::PlanStore;
use crate::plan::service::PlanService;
use crate::settlement::guard::PlanLocks;
use crate::settlement::scheduler::{ScheduleConfig, ScheduleCoordinator};
use crate::wallet::custody::{AesKeyCustody, KeyCustody, SigningSecret};

pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn signer() -> SigningSecret {
    SigningSecret::from_bytes(vec![42u8; 32])
}

pub fn create_request(interval: &str) -> CreatePlanRequest {
    CreatePlanRequest {
        owner_ref: "user-1".to_string(),
        token_ref: "0xtoken".to_string(),
        initial_amount: dec!(100),
        periodic_amount: dec!(10),
        reason: "rainy day".to_string(),
        lock_type: "soft".to_string(),
        duration: 2_592_000,
        interval: interval.to_string(),
    }
}

/// DAILY plan opened at `opened_at` with a confirmed 100 opening deposit.
/// The stored key is a placeholder and cannot be decrypted.
pub fn sample_plan(pool_id: &str, opened_at: DateTime<Utc>) -> SavingPlan {
    plan_with_key(pool_id, opened_at, "v1:placeholder".to_string())
}

fn plan_with_key(pool_id: &str, opened_at: DateTime<Utc>, encrypted_signing_key: String) -> SavingPlan {
    let config = create_request("DAILY").into_config().unwrap();
    let opening = TransactionEntry::confirmed(
        format!("tx-open-{}", pool_id),
        config.initial_amount,
        DepositType::Save,
        config.initial_amount,
        opened_at,
    );
    SavingPlan::open(
        config,
        pool_id.to_string(),
        "USDC".to_string(),
        encrypted_signing_key,
        opening,
        opened_at,
    )
}

/// Behaviour of state-changing settlement calls
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    Succeed,
    InsufficientBalance,
    Reject(String),
}

/// Settlement double that keeps pool balances in memory
pub struct ScriptedSettlement {
    script: Mutex<Script>,
    balances: Mutex<HashMap<String, Decimal>>,
    delay: Mutex<Duration>,
    failing_pool_queries: AtomicBool,
    deposits: AtomicUsize,
    opens: AtomicUsize,
}

impl ScriptedSettlement {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::Succeed),
            balances: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            failing_pool_queries: AtomicBool::new(false),
            deposits: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_pool_queries(&self, failing: bool) {
        self.failing_pool_queries.store(failing, Ordering::SeqCst);
    }

    pub fn set_balance(&self, pool_id: &str, amount: Decimal) {
        self.balances.lock().insert(pool_id.to_string(), amount);
    }

    /// Successful recurring deposits applied so far
    pub fn deposit_calls(&self) -> usize {
        self.deposits.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    async fn scripted_outcome(&self, amount: Decimal) -> AppResult<()> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.script.lock().clone();
        match script {
            Script::Succeed => Ok(()),
            Script::InsufficientBalance => Err(SettlementError::InsufficientBalance {
                required: amount.to_string(),
                available: "0".to_string(),
            }
            .into()),
            Script::Reject(reason) => Err(SettlementError::Rejected(reason).into()),
        }
    }
}

#[async_trait]
impl SettlementLayer for ScriptedSettlement {
    async fn open_pool(&self, request: &OpenPoolRequest, _signer: &SigningSecret) -> AppResult<OpenPoolReceipt> {
        self.scripted_outcome(request.amount).await?;

        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let pool_id = format!("pool-{}", n);
        self.set_balance(&pool_id, request.amount);

        Ok(OpenPoolReceipt {
            tx_ref: format!("tx-open-{}", n),
            pool_id,
        })
    }

    async fn apply_recurring_deposit(
        &self,
        pool_id: &str,
        amount: Decimal,
        _token_ref: &str,
        _signer: &SigningSecret,
    ) -> AppResult<DepositReceipt> {
        self.scripted_outcome(amount).await?;

        *self.balances.lock().entry(pool_id.to_string()).or_default() += amount;
        let n = self.deposits.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(DepositReceipt {
            tx_ref: format!("tx-deposit-{}", n),
        })
    }

    async fn get_pool(&self, pool_id: &str) -> AppResult<PoolState> {
        if self.failing_pool_queries.load(Ordering::SeqCst) {
            return Err(SettlementError::Network("pool query unavailable".to_string()).into());
        }

        let balance = self
            .balances
            .lock()
            .get(pool_id)
            .copied()
            .ok_or_else(|| SettlementError::Rejected(format!("unknown pool {}", pool_id)))?;

        Ok(PoolState {
            pool_id: pool_id.to_string(),
            amount_saved: balance,
            is_active: true,
            token_ref: Some("0xtoken".to_string()),
        })
    }

    async fn get_token_symbol(&self, _token_ref: &str) -> AppResult<String> {
        Ok("USDC".to_string())
    }
}

/// In-memory store whose writes can be slowed down, so tests can interleave
/// a writer between another writer's load and save
pub struct LaggingStore {
    inner: Arc<InMemoryPlanStore>,
    save_delay: Mutex<Duration>,
}

impl LaggingStore {
    pub fn new(inner: Arc<InMemoryPlanStore>) -> Self {
        Self {
            inner,
            save_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock() = delay;
    }
}

#[async_trait]
impl PlanStore for LaggingStore {
    async fn find_active_plans(&self) -> AppResult<Vec<SavingPlan>> {
        self.inner.find_active_plans().await
    }

    async fn find_due_plans(&self, now: DateTime<Utc>) -> AppResult<Vec<SavingPlan>> {
        self.inner.find_due_plans(now).await
    }

    async fn find_by_pool_id(&self, pool_id: &str) -> AppResult<Option<SavingPlan>> {
        self.inner.find_by_pool_id(pool_id).await
    }

    async fn insert(&self, plan: &SavingPlan) -> AppResult<()> {
        self.inner.insert(plan).await
    }

    async fn save(&self, plan: &SavingPlan) -> AppResult<()> {
        let delay = *self.save_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.save(plan).await
    }
}

/// In-memory store, real AES custody and scripted settlement wired together.
/// Components write through `writes`; `store` is the same data without lag.
pub struct Harness {
    pub store: Arc<InMemoryPlanStore>,
    pub writes: Arc<LaggingStore>,
    pub custody: Arc<AesKeyCustody>,
    pub settlement: Arc<ScriptedSettlement>,
    pub executor: Arc<SettlementExecutor>,
    pub coordinator: Arc<ScheduleCoordinator>,
    pub service: PlanService,
}

impl Harness {
    /// Sweep-driven coordinator; no per-plan timers are spawned
    pub fn new() -> Self {
        Self::build(false)
    }

    pub fn with_timers() -> Self {
        Self::build(true)
    }

    fn build(per_plan_timers: bool) -> Self {
        let store = Arc::new(InMemoryPlanStore::new());
        let writes = Arc::new(LaggingStore::new(store.clone()));
        let custody = Arc::new(AesKeyCustody::new("test-master-secret").unwrap());
        let settlement = Arc::new(ScriptedSettlement::new());
        let locks = PlanLocks::new();

        let executor = Arc::new(SettlementExecutor::new(
            writes.clone(),
            custody.clone(),
            settlement.clone(),
            locks.clone(),
        ));
        let coordinator = Arc::new(ScheduleCoordinator::new(
            ScheduleConfig {
                sweep_interval: Duration::from_secs(3600),
                per_plan_timers,
            },
            writes.clone(),
            executor.clone(),
        ));
        let service = PlanService::new(
            writes.clone(),
            custody.clone(),
            settlement.clone(),
            coordinator.clone(),
            locks,
        );

        Self {
            store,
            writes,
            custody,
            settlement,
            executor,
            coordinator,
            service,
        }
    }

    /// Insert a decryptable DAILY plan opened on `opened_at` whose pool
    /// holds the 100 opening deposit
    pub async fn seed_plan(&self, pool_id: &str, opened_at: DateTime<Utc>) -> SavingPlan {
        self.seed_plan_at(pool_id, opened_at).await
    }

    pub async fn seed_plan_at(&self, pool_id: &str, opened_at: DateTime<Utc>) -> SavingPlan {
        let encrypted = self.custody.encrypt(&signer()).await.unwrap();
        let plan = plan_with_key(pool_id, opened_at, encrypted);

        self.store.insert(&plan).await.unwrap();
        self.settlement.set_balance(pool_id, dec!(100));
        plan
    }

    pub async fn stored(&self, pool_id: &str) -> SavingPlan {
        self.store.find_by_pool_id(pool_id).await.unwrap().unwrap()
    }
}
