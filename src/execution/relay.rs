// Settlement relay client
//
// Talks to an HTTP relay in front of the pool contract. The signing secret
// never leaves the process: each state-changing call sends a canonical JSON
// intent together with an Ed25519 signature over its exact bytes.
//
//   POST {base}/pools                  -> { txRef, poolId }
//   POST {base}/pools/{poolId}/deposits -> { txRef }
//   GET  {base}/pools/{poolId}          -> PoolState
//   GET  {base}/tokens/{token}/symbol   -> { symbol }

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::chain::{DepositReceipt, OpenPoolReceipt, OpenPoolRequest, PoolState, SettlementLayer};
use crate::error::{AppResult, CustodyError, SettlementError};
use crate::wallet::custody::SigningSecret;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8545".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Intent<'a> {
    action: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pool_id: Option<&'a str>,
    token: &'a str,
    amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    nonce: String,
    issued_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedIntent {
    /// Canonical JSON of the intent; the signature covers these bytes
    payload: String,
    public_key: String,
    signature: String,
}

#[derive(Debug, Default, Deserialize)]
struct RelayErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    required: Option<String>,
    #[serde(default)]
    available: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenSymbol {
    symbol: String,
}

pub struct RelaySettlementLayer {
    config: RelayConfig,
    client: reqwest::Client,
}

impl RelaySettlementLayer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn sign(intent: &Intent<'_>, signer: &SigningSecret) -> AppResult<SignedIntent> {
        let seed: [u8; 32] = signer
            .as_bytes()
            .try_into()
            .map_err(|_| CustodyError::InvalidSecret("signing secret must be 32 bytes".to_string()))?;
        let key = SigningKey::from_bytes(&seed);

        let payload = serde_json::to_string(intent)
            .map_err(|e| SettlementError::InvalidResponse(format!("Failed to encode intent: {}", e)))?;
        let signature = key.sign(payload.as_bytes());

        Ok(SignedIntent {
            payload,
            public_key: hex::encode(key.verifying_key().to_bytes()),
            signature: BASE64.encode(signature.to_bytes()),
        })
    }

    async fn post_signed<T: DeserializeOwned>(&self, path: &str, body: &SignedIntent) -> AppResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SettlementError::Network(format!("Failed to submit intent: {:?}", e)))?;

        Self::read_response(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| SettlementError::Network(format!("Failed to query relay: {:?}", e)))?;

        Self::read_response(response).await
    }

    async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, &text).into());
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SettlementError::InvalidResponse(format!("Failed to parse response: {:?}", e)).into())
    }

    fn classify_failure(status: StatusCode, body: &str) -> SettlementError {
        let parsed: RelayErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .unwrap_or_else(|| format!("relay returned {}: {}", status, body));

        if parsed.code.as_deref() == Some("INSUFFICIENT_BALANCE") {
            return SettlementError::InsufficientBalance {
                required: parsed.required.unwrap_or_else(|| "unknown".to_string()),
                available: parsed.available.unwrap_or_else(|| "unknown".to_string()),
            };
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            SettlementError::Network(message)
        } else {
            SettlementError::Rejected(message)
        }
    }
}

#[async_trait]
impl SettlementLayer for RelaySettlementLayer {
    async fn open_pool(
        &self,
        request: &OpenPoolRequest,
        signer: &SigningSecret,
    ) -> AppResult<OpenPoolReceipt> {
        let intent = Intent {
            action: "openPool",
            pool_id: None,
            token: &request.token_ref,
            amount: request.amount.to_string(),
            reason: Some(&request.reason),
            lock_type: Some(request.lock_type.as_str()),
            duration: Some(request.duration),
            nonce: Uuid::new_v4().to_string(),
            issued_at: Utc::now().timestamp(),
        };
        let signed = Self::sign(&intent, signer)?;

        let receipt: OpenPoolReceipt = self.post_signed("/pools", &signed).await?;
        info!("Pool {} opened (tx: {})", receipt.pool_id, receipt.tx_ref);
        Ok(receipt)
    }

    async fn apply_recurring_deposit(
        &self,
        pool_id: &str,
        amount: Decimal,
        token_ref: &str,
        signer: &SigningSecret,
    ) -> AppResult<DepositReceipt> {
        let intent = Intent {
            action: "applyRecurringDeposit",
            pool_id: Some(pool_id),
            token: token_ref,
            amount: amount.to_string(),
            reason: None,
            lock_type: None,
            duration: None,
            nonce: Uuid::new_v4().to_string(),
            issued_at: Utc::now().timestamp(),
        };
        let signed = Self::sign(&intent, signer)?;

        let receipt: DepositReceipt = self
            .post_signed(&format!("/pools/{}/deposits", pool_id), &signed)
            .await?;
        debug!("Deposit into pool {} submitted (tx: {})", pool_id, receipt.tx_ref);
        Ok(receipt)
    }

    async fn get_pool(&self, pool_id: &str) -> AppResult<PoolState> {
        self.get_json(&format!("/pools/{}", pool_id)).await
    }

    async fn get_token_symbol(&self, token_ref: &str) -> AppResult<String> {
        let token: TokenSymbol = self.get_json(&format!("/tokens/{}/symbol", token_ref)).await?;
        Ok(token.symbol)
    }
}
