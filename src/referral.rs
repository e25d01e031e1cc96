//! Referral conversion tracking.
//!
//! A deal may carry a referral code; once the deal is activated the code is
//! reported as converted. Reporting is best-effort: callers log failures and
//! carry on.

use crate::domain::DealId;
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReferralError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
}

#[async_trait]
pub trait ReferralTracker: Send + Sync + fmt::Debug {
    async fn record_conversion(&self, code: &str, deal_id: DealId) -> Result<(), ReferralError>;
}

/// Used when no referral service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReferralTracker;

#[async_trait]
impl ReferralTracker for NoopReferralTracker {
    async fn record_conversion(&self, code: &str, deal_id: DealId) -> Result<(), ReferralError> {
        debug!(code, deal_id = %deal_id, "Referral tracking disabled");
        Ok(())
    }
}

/// POSTs `{"code", "dealId"}` to the configured referral endpoint.
#[derive(Debug, Clone)]
pub struct HttpReferralTracker {
    client: reqwest::Client,
    url: String,
}

impl HttpReferralTracker {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ReferralError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReferralError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReferralTracker for HttpReferralTracker {
    async fn record_conversion(&self, code: &str, deal_id: DealId) -> Result<(), ReferralError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "code": code, "dealId": deal_id.as_i64() }))
            .send()
            .await
            .map_err(|e| ReferralError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReferralError::Http {
                status: status.as_u16(),
                message,
            });
        }

        debug!(code, deal_id = %deal_id, "Referral conversion recorded");
        Ok(())
    }
}

/// Records conversions in memory; optionally fails every call.
#[derive(Debug, Default)]
pub struct MockReferralTracker {
    conversions: Mutex<Vec<(String, DealId)>>,
    failing: bool,
}

impl MockReferralTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            conversions: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn conversions(&self) -> Vec<(String, DealId)> {
        self.conversions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ReferralTracker for MockReferralTracker {
    async fn record_conversion(&self, code: &str, deal_id: DealId) -> Result<(), ReferralError> {
        self.conversions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((code.to_string(), deal_id));
        if self.failing {
            return Err(ReferralError::Http {
                status: 503,
                message: "referral service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_even_when_failing() {
        let tracker = MockReferralTracker::failing();
        let err = tracker
            .record_conversion("friend", DealId::new(4))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::Http { status: 503, .. }));
        assert_eq!(
            tracker.conversions(),
            vec![("friend".to_string(), DealId::new(4))]
        );
    }

    #[tokio::test]
    async fn test_http_tracker_unreachable_is_network_error() {
        let tracker =
            HttpReferralTracker::new("http://127.0.0.1:1/referrals", Duration::from_millis(500))
                .unwrap();
        let err = tracker
            .record_conversion("friend", DealId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::Network(_)));
    }

    #[tokio::test]
    async fn test_noop_tracker_accepts() {
        tokio_test::assert_ok!(
            NoopReferralTracker
                .record_conversion("any", DealId::new(1))
                .await
        );
    }
}
