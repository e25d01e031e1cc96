use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use zendo::secrets::SecretsClient;
use zendo::{
    api, config::Config, db::init_db, EngineConfig, GatewayLedger, HttpReferralTracker,
    NoopReferralTracker, ReferralTracker, Repository, Services, SystemClock,
};

const REFERRAL_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Ledger credentials: environment first, then the secret store
    let ledger_api_key = match (&config.ledger_api_key, &config.secrets) {
        (Some(key), _) => Some(key.clone()),
        (None, Some(secrets)) => {
            match SecretsClient::new(secrets.clone())
                .get_secret("LEDGER_API_KEY")
                .await
            {
                Ok(key) => Some(key),
                Err(e) => {
                    eprintln!("Failed to load ledger credentials: {}", e);
                    std::process::exit(1);
                }
            }
        }
        (None, None) => None,
    };

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let referrals: Arc<dyn ReferralTracker> = match &config.referral_url {
        Some(url) => match HttpReferralTracker::new(url.clone(), REFERRAL_TIMEOUT) {
            Ok(tracker) => Arc::new(tracker),
            Err(e) => {
                eprintln!("Failed to build referral client: {}", e);
                std::process::exit(1);
            }
        },
        None => Arc::new(NoopReferralTracker),
    };

    let services = Services::new(
        Arc::new(Repository::new(pool)),
        Arc::new(GatewayLedger::new(
            config.ledger_url.clone(),
            ledger_api_key,
            config.ledger_timeout,
        )),
        Arc::new(SystemClock),
        referrals,
        EngineConfig::new(
            config.commission_account.clone(),
            config.custody_address.clone(),
            config.chain.clone(),
        ),
    );

    match config.settlement_interval {
        Some(every) => {
            tracing::info!(interval_secs = every.as_secs(), "Settlement loop scheduled");
            tokio::spawn(services.reconciler.clone().run_forever(every));
        }
        None => tracing::info!("Settlement loop disabled"),
    }

    // Create router
    let app = api::create_router(services.app_state());

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    // Run server
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
