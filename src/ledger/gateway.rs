//! Ledger client for the chain gateway service.
//!
//! The gateway holds the signing key and talks to the RPC node; this client
//! speaks its JSON-over-HTTP protocol: `POST {base}/rpc` with
//! `{"method": ..., "params": ...}`, answered by `{"result": ...}` or
//! `{"error": "..."}`. Reads are retried with backoff. Writes are sent once,
//! since a retried write could submit a second transaction.

use super::{ExpectedTransfer, Ledger, LedgerError, ObservedTransfer};
use crate::domain::{Address, Deal, DealId, DealTerms, Decimal, TokenMetadata, TxHash};
use crate::retry::{retry_bounded, RetryPolicy};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct GatewayLedger {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    read_policy: RetryPolicy,
}

impl GatewayLedger {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build ledger HTTP client with timeout, using defaults");
                Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            read_policy: RetryPolicy::default()
                .with_initial_interval(Duration::from_millis(500)),
        }
    }

    async fn send(&self, method: &str, params: &Value) -> Result<Value, backoff::Error<LedgerError>> {
        let url = format!("{}/rpc", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .json(&json!({ "method": method, "params": params }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            backoff::Error::transient(LedgerError::Network(e.to_string()))
        })?;

        let status = response.status();
        if status == 429 {
            return Err(backoff::Error::transient(LedgerError::RateLimited));
        }
        if status.is_server_error() {
            return Err(backoff::Error::transient(LedgerError::Http {
                status: status.as_u16(),
                message: "Server error".to_string(),
            }));
        }
        if !status.is_success() {
            return Err(backoff::Error::permanent(LedgerError::Http {
                status: status.as_u16(),
                message: "Client error".to_string(),
            }));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| backoff::Error::permanent(LedgerError::InvalidResponse(e.to_string())))?;
        unwrap_envelope(body).map_err(backoff::Error::permanent)
    }

    async fn read(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        debug!(method, "ledger read");
        retry_bounded(&self.read_policy, || self.send(method, &params))
            .await
            .map_err(|e| e.into_inner())
    }

    async fn write(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        debug!(method, "ledger write");
        self.send(method, &params).await.map_err(|e| match e {
            backoff::Error::Permanent(e) => e,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}

fn unwrap_envelope(body: Value) -> Result<Value, LedgerError> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        let message = err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(LedgerError::Rejected(message));
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| LedgerError::InvalidResponse("Missing result field".to_string()))
}

fn parse_tx_hash(result: &Value) -> Result<TxHash, LedgerError> {
    let raw = result
        .get("txHash")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LedgerError::InvalidResponse("Missing txHash field".to_string()))?;
    TxHash::parse(raw).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}

fn parse_decimal(value: &Value, field: &str) -> Result<Decimal, LedgerError> {
    let raw = match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(LedgerError::InvalidResponse(format!(
                "Missing {} field",
                field
            )))
        }
    };
    Decimal::from_str_canonical(&raw)
        .map_err(|e| LedgerError::InvalidResponse(format!("Invalid {}: {}", field, e)))
}

fn parse_token_metadata(result: &Value) -> Result<Option<TokenMetadata>, LedgerError> {
    if result.is_null() {
        return Ok(None);
    }
    serde_json::from_value(result.clone())
        .map(Some)
        .map_err(|e| LedgerError::InvalidResponse(format!("Invalid token metadata: {}", e)))
}

fn parse_transfer(result: &Value) -> Result<Option<ObservedTransfer>, LedgerError> {
    if result.is_null() {
        return Ok(None);
    }
    if result.get("status").and_then(|v| v.as_str()) == Some("failed") {
        return Ok(None);
    }
    serde_json::from_value(result.clone())
        .map(Some)
        .map_err(|e| LedgerError::InvalidResponse(format!("Invalid transfer: {}", e)))
}

#[async_trait]
impl Ledger for GatewayLedger {
    async fn create_deal(&self, deal_id: DealId, terms: &DealTerms) -> Result<TxHash, LedgerError> {
        let result = self
            .write(
                "createDeal",
                json!({
                    "id": deal_id.as_i64(),
                    "name": terms.name,
                    "maxParticipants": terms.max_rewards,
                    "creatorAddress": terms.coin_owner_address,
                    "numberDays": terms.minimum_days_to_hold,
                    "startDate": terms.start_date.timestamp(),
                    "endDate": terms.end_date.timestamp(),
                    "tokenAddress": terms.contract_address,
                    "minimumAmountToHold": terms.minimum_amount_to_hold.to_canonical_string(),
                    "reward": terms.reward.to_canonical_string(),
                }),
            )
            .await?;
        parse_tx_hash(&result)
    }

    async fn activate(&self, deal_id: DealId) -> Result<(), LedgerError> {
        self.write("activateDeal", json!({ "id": deal_id.as_i64() }))
            .await?;
        Ok(())
    }

    async fn join(&self, deal_id: DealId, player: &Address) -> Result<TxHash, LedgerError> {
        let result = self
            .write(
                "addParticipant",
                json!({ "id": deal_id.as_i64(), "participant": player }),
            )
            .await?;
        parse_tx_hash(&result)
    }

    async fn mark_deal_ended(&self, deal_id: DealId) -> Result<TxHash, LedgerError> {
        let result = self
            .write("endDeal", json!({ "id": deal_id.as_i64() }))
            .await?;
        parse_tx_hash(&result)
    }

    async fn update_count(&self, deal_id: DealId, player: &Address) -> Result<TxHash, LedgerError> {
        let result = self
            .write(
                "rewardParticipant",
                json!({ "id": deal_id.as_i64(), "participant": player }),
            )
            .await?;
        parse_tx_hash(&result)
    }

    async fn does_user_have_balance(
        &self,
        player: &Address,
        token: &Address,
        minimum: Decimal,
    ) -> Result<bool, LedgerError> {
        let result = self
            .read(
                "getTokenBalance",
                json!({ "owner": player, "token": token }),
            )
            .await?;
        if result.is_null() {
            return Ok(false);
        }
        let balance = parse_decimal(&result, "balance")?;
        Ok(balance >= minimum)
    }

    async fn token_details(&self, token: &Address) -> Result<Option<TokenMetadata>, LedgerError> {
        let result = self
            .read("getTokenMetadata", json!({ "token": token }))
            .await?;
        parse_token_metadata(&result)
    }

    async fn token_price(&self, token: &Address) -> Result<Option<Decimal>, LedgerError> {
        let result = self
            .read("getTokenPrice", json!({ "token": token }))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_decimal(&result, "price").map(Some)
    }

    async fn verify_transaction(
        &self,
        deal: &Deal,
        tx_hash: &TxHash,
        expected: &ExpectedTransfer,
    ) -> Result<bool, LedgerError> {
        let result = self
            .read(
                "getTransfer",
                json!({ "txHash": tx_hash, "token": expected.token }),
            )
            .await?;
        let Some(transfer) = parse_transfer(&result)? else {
            debug!(deal_id = %deal.id, tx_hash = %tx_hash, "no confirmed transfer found");
            return Ok(false);
        };
        let ok = transfer.satisfies(expected);
        if !ok {
            debug!(
                deal_id = %deal.id,
                tx_hash = %tx_hash,
                purpose = %expected.purpose,
                "transfer does not match expected payment"
            );
        }
        Ok(ok)
    }
}
