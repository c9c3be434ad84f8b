use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppResult, PlanError};
use crate::ledger::{TransactionEntry, TransactionLedger};
use crate::plan::schedule::{next_fire_time, Interval};

/// How strictly the pool locks deposited funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    None,
    Soft,
    Hard,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::None => "none",
            LockType::Soft => "soft",
            LockType::Hard => "hard",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LockType {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(LockType::None),
            "soft" => Ok(LockType::Soft),
            "hard" => Ok(LockType::Hard),
            _ => Err(PlanError::UnknownLockType(s.to_string())),
        }
    }
}

/// Lifecycle state of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    /// Has a live timer and executes on schedule
    Active,
    /// No timer; data and ledger retained
    Stopped,
}

/// Unvalidated plan creation input, as received from a caller
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, message = "owner reference is required"))]
    pub owner_ref: String,
    #[validate(length(min = 1, message = "token reference is required"))]
    pub token_ref: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub periodic_amount: Decimal,
    #[validate(length(min = 1, max = 280, message = "reason must be 1-280 characters"))]
    pub reason: String,
    pub lock_type: String,
    /// Lock duration in seconds
    pub duration: u64,
    pub interval: String,
}

/// Validated plan configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PlanConfig {
    pub owner_ref: String,
    pub token_ref: String,
    pub initial_amount: Decimal,
    pub periodic_amount: Decimal,
    pub reason: String,
    pub lock_type: LockType,
    pub duration: u64,
    pub interval: Interval,
}

impl CreatePlanRequest {
    /// Validate the request. Unknown intervals are rejected here so they
    /// can never reach the scheduling path.
    pub fn into_config(self) -> AppResult<PlanConfig> {
        self.validate()?;

        let interval: Interval = self.interval.parse()?;
        let lock_type: LockType = self.lock_type.parse()?;
        ensure_positive("initialAmount", self.initial_amount)?;
        ensure_positive("periodicAmount", self.periodic_amount)?;
        if self.duration > MAX_LOCK_DURATION_SECS {
            return Err(PlanError::InvalidDuration(self.duration).into());
        }

        Ok(PlanConfig {
            owner_ref: self.owner_ref,
            token_ref: self.token_ref,
            initial_amount: self.initial_amount,
            periodic_amount: self.periodic_amount,
            reason: self.reason,
            lock_type,
            duration: self.duration,
            interval,
        })
    }
}

/// Upper bound on a pool lock: one hundred years
pub const MAX_LOCK_DURATION_SECS: u64 = 100 * 365 * 86_400;

fn ensure_positive(field: &'static str, value: Decimal) -> Result<(), PlanError> {
    if value <= Decimal::ZERO {
        return Err(PlanError::InvalidAmount {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One recurring deposit schedule bound to one external pool.
///
/// INVARIANTS:
/// - `next_execution_time == next_fire_time(interval, last_execution_time)`
/// - `total_amount == transactions.total_amount()`
///
/// Every transition returns a new snapshot; persisting it is the caller's job.
/// Serializable for callers but never deserialized: the encrypted key is
/// not part of the wire form, so plans are only rebuilt from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingPlan {
    pub plan_id: Uuid,
    pub pool_id: String,

    pub owner_ref: String,
    pub token_ref: String,
    pub token_symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub periodic_amount: Decimal,
    pub reason: String,
    pub lock_type: LockType,
    pub duration: u64,
    pub interval: Interval,

    pub is_active: bool,
    pub last_execution_time: DateTime<Utc>,
    pub next_execution_time: DateTime<Utc>,
    #[serde(skip)]
    pub encrypted_signing_key: String,

    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    pub transactions: TransactionLedger,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SavingPlan {
    /// Build an active plan around its already-confirmed opening deposit
    pub fn open(
        config: PlanConfig,
        pool_id: String,
        token_symbol: String,
        encrypted_signing_key: String,
        opening_deposit: TransactionEntry,
        opened_at: DateTime<Utc>,
    ) -> Self {
        let transactions = TransactionLedger::new().append(opening_deposit);

        Self {
            plan_id: Uuid::new_v4(),
            pool_id,
            owner_ref: config.owner_ref,
            token_ref: config.token_ref,
            token_symbol,
            initial_amount: config.initial_amount,
            periodic_amount: config.periodic_amount,
            reason: config.reason,
            lock_type: config.lock_type,
            duration: config.duration,
            interval: config.interval,
            is_active: true,
            last_execution_time: opened_at,
            next_execution_time: next_fire_time(config.interval, opened_at),
            encrypted_signing_key,
            total_amount: transactions.total_amount(),
            transactions,
            created_at: opened_at,
            updated_at: opened_at,
        }
    }

    pub fn state(&self) -> PlanState {
        if self.is_active {
            PlanState::Active
        } else {
            PlanState::Stopped
        }
    }

    /// Active and at or past its next execution time
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_execution_time <= now
    }

    /// Append a ledger entry, recomputing the total when it is confirmed
    pub fn append_transaction(&self, entry: TransactionEntry, now: DateTime<Utc>) -> Self {
        let confirmed = entry.is_confirmed();
        let mut next = self.clone();
        next.transactions = self.transactions.append(entry);
        if confirmed {
            next.total_amount = next.transactions.total_amount();
        }
        next.updated_at = now;
        next
    }

    /// Mark the plan executed at `executed_at` and move the window forward
    pub fn advance_window(&self, executed_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.last_execution_time = executed_at;
        next.next_execution_time = next_fire_time(self.interval, executed_at);
        next.updated_at = executed_at;
        next
    }

    /// Record a successful settlement: ledger entry plus window advance
    pub fn record_execution(&self, entry: TransactionEntry, executed_at: DateTime<Utc>) -> Self {
        self.append_transaction(entry, executed_at)
            .advance_window(executed_at)
    }

    /// ACTIVE -> STOPPED. Ledger and timing fields are left untouched.
    pub fn stop(&self, now: DateTime<Utc>) -> Result<Self, PlanError> {
        if !self.is_active {
            return Err(PlanError::AlreadyStopped(self.pool_id.clone()));
        }
        let mut next = self.clone();
        next.is_active = false;
        next.updated_at = now;
        Ok(next)
    }

    /// STOPPED -> ACTIVE. `next_execution_time` is kept even if it has
    /// already elapsed, so the next sweep executes immediately.
    pub fn resume(&self, now: DateTime<Utc>) -> Result<Self, PlanError> {
        if self.is_active {
            return Err(PlanError::AlreadyActive(self.pool_id.clone()));
        }
        let mut next = self.clone();
        next.is_active = true;
        next.updated_at = now;
        Ok(next)
    }

    pub fn with_periodic_amount(&self, amount: Decimal, now: DateTime<Utc>) -> Result<Self, PlanError> {
        ensure_positive("periodicAmount", amount)?;
        let mut next = self.clone();
        next.periodic_amount = amount;
        next.updated_at = now;
        Ok(next)
    }
}
