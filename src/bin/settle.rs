//! Runs the settlement reconciler once and exits. Intended for cron.

use anyhow::Context;
use std::sync::Arc;
use zendo::secrets::SecretsClient;
use zendo::{
    config::Config, db::init_db, EngineConfig, GatewayLedger, NoopReferralTracker, Repository,
    Services, SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let ledger_api_key = match (&config.ledger_api_key, &config.secrets) {
        (Some(key), _) => Some(key.clone()),
        (None, Some(secrets)) => Some(
            SecretsClient::new(secrets.clone())
                .get_secret("LEDGER_API_KEY")
                .await
                .context("loading ledger credentials")?,
        ),
        (None, None) => None,
    };

    let pool = init_db(&config.database_path)
        .await
        .context("initializing database")?;

    // Activation never happens here, so referral reporting is not needed.
    let services = Services::new(
        Arc::new(Repository::new(pool)),
        Arc::new(GatewayLedger::new(
            config.ledger_url.clone(),
            ledger_api_key,
            config.ledger_timeout,
        )),
        Arc::new(SystemClock),
        Arc::new(NoopReferralTracker),
        EngineConfig::new(
            config.commission_account,
            config.custody_address,
            config.chain,
        ),
    );

    let summary = services
        .reconciler
        .run_once()
        .await
        .context("listing deals to settle")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
