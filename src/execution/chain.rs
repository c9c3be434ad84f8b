use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::plan::models::LockType;
use crate::wallet::custody::SigningSecret;

/// Parameters for opening a new pool with its first deposit
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPoolRequest {
    pub token_ref: String,
    pub amount: Decimal,
    pub reason: String,
    pub lock_type: LockType,
    /// Lock duration in seconds
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPoolReceipt {
    pub tx_ref: String,
    pub pool_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositReceipt {
    pub tx_ref: String,
}

/// Pool state as reported by the settlement layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    pub pool_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_saved: Decimal,
    pub is_active: bool,
    #[serde(default)]
    pub token_ref: Option<String>,
}

/// The external pooled-balance ledger.
///
/// Every call may be slow or fail; no timeout is imposed on top of the
/// implementation's own.
#[async_trait]
pub trait SettlementLayer: Send + Sync {
    async fn open_pool(
        &self,
        request: &OpenPoolRequest,
        signer: &SigningSecret,
    ) -> AppResult<OpenPoolReceipt>;

    async fn apply_recurring_deposit(
        &self,
        pool_id: &str,
        amount: Decimal,
        token_ref: &str,
        signer: &SigningSecret,
    ) -> AppResult<DepositReceipt>;

    async fn get_pool(&self, pool_id: &str) -> AppResult<PoolState>;

    async fn get_token_symbol(&self, token_ref: &str) -> AppResult<String>;
}
