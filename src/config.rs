use crate::domain::{Address, Chain};
use crate::secrets::SecretsConfig;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub ledger_url: String,
    pub ledger_api_key: Option<String>,
    pub ledger_timeout: Duration,
    pub chain: Chain,
    pub commission_account: Address,
    pub custody_address: Address,
    pub referral_url: Option<String>,
    /// `None` disables the background settlement loop.
    pub settlement_interval: Option<Duration>,
    pub secrets: Option<SecretsConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

const SECRETS_VARS: [&str; 5] = [
    "SECRETS_URL",
    "SECRETS_CLIENT_ID",
    "SECRETS_CLIENT_SECRET",
    "SECRETS_PROJECT_ID",
    "SECRETS_ENVIRONMENT",
];

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = required(&env_map, "DATABASE_PATH")?;
        let ledger_url = required(&env_map, "LEDGER_URL")?;
        let ledger_api_key = optional(&env_map, "LEDGER_API_KEY");

        let ledger_timeout_ms = env_map
            .get("LEDGER_TIMEOUT_MS")
            .map(|s| s.as_str())
            .unwrap_or("15000")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "LEDGER_TIMEOUT_MS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;

        let chain = Chain::new(
            env_map
                .get("CHAIN")
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or("arbitrum"),
        );

        let commission_account = address(&env_map, "COMMISSION_ACCOUNT")?;
        let custody_address = address(&env_map, "CUSTODY_ADDRESS")?;
        let referral_url = optional(&env_map, "REFERRAL_URL");

        let interval_secs = env_map
            .get("SETTLEMENT_INTERVAL_SECS")
            .map(|s| s.as_str())
            .unwrap_or("3600")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "SETTLEMENT_INTERVAL_SECS".to_string(),
                    "must be a valid u64".to_string(),
                )
            })?;
        let settlement_interval = (interval_secs > 0).then(|| Duration::from_secs(interval_secs));

        let secrets = parse_secrets_from_map(&env_map)?;

        Ok(Config {
            port,
            database_path,
            ledger_url,
            ledger_api_key,
            ledger_timeout: Duration::from_millis(ledger_timeout_ms),
            chain,
            commission_account,
            custody_address,
            referral_url,
            settlement_interval,
            secrets,
        })
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    optional(env_map, key).ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn optional(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn address(env_map: &HashMap<String, String>, key: &str) -> Result<Address, ConfigError> {
    let raw = required(env_map, key)?;
    Address::parse(&raw)
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

/// The secret store is configured all-or-nothing.
fn parse_secrets_from_map(
    env_map: &HashMap<String, String>,
) -> Result<Option<SecretsConfig>, ConfigError> {
    let values: Vec<Option<String>> = SECRETS_VARS
        .iter()
        .map(|key| optional(env_map, key))
        .collect();

    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    if let Some(missing) = SECRETS_VARS
        .iter()
        .zip(&values)
        .find_map(|(key, value)| value.is_none().then_some(*key))
    {
        return Err(ConfigError::MissingEnv(missing.to_string()));
    }

    let mut values = values.into_iter().flatten();
    let mut next = || values.next().unwrap_or_default();
    Ok(Some(SecretsConfig {
        url: next(),
        client_id: next(),
        client_secret: next(),
        project_id: next(),
        environment: next(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert(
            "LEDGER_URL".to_string(),
            "http://localhost:9000".to_string(),
        );
        map.insert(
            "COMMISSION_ACCOUNT".to_string(),
            format!("0x{}", "c".repeat(40)),
        );
        map.insert(
            "CUSTODY_ADDRESS".to_string(),
            format!("0x{}", "d".repeat(40)),
        );
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.chain, Chain::new("arbitrum"));
        assert_eq!(config.ledger_timeout, Duration::from_millis(15000));
        assert_eq!(config.settlement_interval, Some(Duration::from_secs(3600)));
        assert!(config.ledger_api_key.is_none());
        assert!(config.referral_url.is_none());
        assert!(config.secrets.is_none());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_ledger_url() {
        let mut env_map = setup_required_env();
        env_map.insert("LEDGER_URL".to_string(), "  ".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "LEDGER_URL"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_commission_account() {
        let mut env_map = setup_required_env();
        env_map.insert("COMMISSION_ACCOUNT".to_string(), "0x1234".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "COMMISSION_ACCOUNT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_interval_disables_settlement() {
        let mut env_map = setup_required_env();
        env_map.insert("SETTLEMENT_INTERVAL_SECS".to_string(), "0".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert!(config.settlement_interval.is_none());
    }

    #[test]
    fn test_partial_secrets_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("SECRETS_URL".to_string(), "https://secrets.example".to_string());
        env_map.insert("SECRETS_CLIENT_ID".to_string(), "id".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "SECRETS_CLIENT_SECRET"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_full_secrets_group() {
        let mut env_map = setup_required_env();
        for (key, value) in SECRETS_VARS.iter().zip(["https://s.example", "id", "pw", "proj", "prod"]) {
            env_map.insert(key.to_string(), value.to_string());
        }
        let secrets = Config::from_env_map(env_map).unwrap().secrets.unwrap();
        assert_eq!(secrets.url, "https://s.example");
        assert_eq!(secrets.client_secret, "pw");
        assert_eq!(secrets.environment, "prod");
    }
}
