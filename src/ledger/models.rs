use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

/// What kind of movement a ledger entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DepositType {
    /// Opening deposit that created the pool
    Save,
    /// Recurring top-up of an existing pool
    Update,
    Withdraw,
}

impl fmt::Display for DepositType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DepositType::Save => "SAVE",
            DepositType::Update => "UPDATE",
            DepositType::Withdraw => "WITHDRAW",
        };
        write!(f, "{}", label)
    }
}

/// One settlement attempt recorded against a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEntry {
    pub tx_ref: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    pub deposit_type: DepositType,
    #[serde(with = "rust_decimal::serde::str")]
    pub pool_amount_after: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransactionEntry {
    pub fn confirmed(
        tx_ref: impl Into<String>,
        amount: Decimal,
        deposit_type: DepositType,
        pool_amount_after: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            tx_ref: tx_ref.into(),
            amount,
            timestamp,
            status: TransactionStatus::Confirmed,
            deposit_type,
            pool_amount_after,
            error: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TransactionStatus::Confirmed
    }
}

/// Append-only, insertion-ordered history of a plan's settlements.
///
/// Derived figures are always recomputed from the full entry list so they
/// stay correct regardless of append order or edits made outside this
/// process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionLedger {
    entries: Vec<TransactionEntry>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<TransactionEntry>) -> Self {
        Self { entries }
    }

    /// Returns a new ledger with `entry` appended at the end
    pub fn append(&self, entry: TransactionEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.push(entry);
        Self { entries }
    }

    pub fn entries(&self) -> &[TransactionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all confirmed entry amounts
    pub fn total_amount(&self) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.is_confirmed())
            .map(|e| e.amount)
            .sum()
    }

    pub fn confirmed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_confirmed()).count()
    }

    pub fn last_confirmed(&self) -> Option<&TransactionEntry> {
        self.entries.iter().rev().find(|e| e.is_confirmed())
    }
}
