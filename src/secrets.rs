//! Client for the secret store, used to fetch credentials at startup.
//!
//! Authenticates with a machine identity (universal auth), then reads raw
//! secrets by name. Both steps are retried with bounded exponential backoff.

use crate::retry::{retry_bounded, RetryError, RetryPolicy};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("secret {0} has no value")]
    MissingValue(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Connection settings for the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsConfig {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    pub project_id: String,
    pub environment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    secret: Option<SecretBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretBody {
    secret_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecretsClient {
    client: Client,
    config: SecretsConfig,
    policy: RetryPolicy,
}

impl SecretsClient {
    pub fn new(config: SecretsConfig) -> Self {
        Self {
            client: Client::new(),
            config: SecretsConfig {
                url: config.url.trim_end_matches('/').to_string(),
                ..config
            },
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch the value of secret `name`.
    ///
    /// # Errors
    /// `Exhausted` once the attempt budget is spent on login or on the read.
    pub async fn get_secret(&self, name: &str) -> Result<String, RetryError<SecretsError>> {
        let token = retry_bounded(&self.policy, || self.login()).await?;
        let value = retry_bounded(&self.policy, || self.read_secret(&token, name)).await?;
        info!(secret = name, "Secret loaded");
        Ok(value)
    }

    async fn login(&self) -> Result<String, backoff::Error<SecretsError>> {
        let url = format!("{}/api/v1/auth/universal-auth/login", self.config.url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "clientId": self.config.client_id,
                "clientSecret": self.config.client_secret,
            }))
            .send()
            .await
            .map_err(|e| backoff::Error::transient(SecretsError::Network(e.to_string())))?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "Secret store login rejected");
            return Err(backoff::Error::transient(SecretsError::Http {
                status: status.as_u16(),
                message: "Login failed".to_string(),
            }));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| backoff::Error::transient(SecretsError::InvalidResponse(e.to_string())))?;
        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| backoff::Error::transient(SecretsError::Unauthorized))
    }

    async fn read_secret(
        &self,
        token: &str,
        name: &str,
    ) -> Result<String, backoff::Error<SecretsError>> {
        let url = format!("{}/api/v3/secrets/raw/{}", self.config.url, name);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("workspaceId", self.config.project_id.as_str()),
                ("environment", self.config.environment.as_str()),
            ])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| backoff::Error::permanent(SecretsError::Network(e.to_string())))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(backoff::Error::transient(SecretsError::Unauthorized));
        }
        if !status.is_success() {
            return Err(backoff::Error::permanent(SecretsError::Http {
                status: status.as_u16(),
                message: "Secret read failed".to_string(),
            }));
        }

        let body: SecretResponse = response
            .json()
            .await
            .map_err(|e| backoff::Error::permanent(SecretsError::InvalidResponse(e.to_string())))?;
        secret_value(body, name).map_err(backoff::Error::transient)
    }
}

fn secret_value(body: SecretResponse, name: &str) -> Result<String, SecretsError> {
    body.secret
        .and_then(|s| s.secret_value)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SecretsError::MissingValue(name.to_string()))
}
