pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod query;
pub mod referral;
pub mod retry;
pub mod secrets;
pub mod settlement;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Address, Chain, Deal, DealId, DealStatus, Decimal, NewDeal, Participation, TxHash};
pub use error::AppError;
pub use ledger::{GatewayLedger, Ledger, LedgerError, MockLedger};
pub use lifecycle::{DealEngine, DealError, EngineConfig};
pub use query::{DealDetails, DealFilter, DealQueries, TokenResolver};
pub use referral::{HttpReferralTracker, NoopReferralTracker, ReferralTracker};
pub use settlement::{Reconciler, RunSummary};

use std::sync::Arc;

/// Wired application components sharing one repository, ledger and clock.
#[derive(Debug, Clone)]
pub struct Services {
    pub repo: Arc<Repository>,
    pub engine: Arc<DealEngine>,
    pub queries: Arc<DealQueries>,
    pub reconciler: Reconciler,
}

impl Services {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        referrals: Arc<dyn ReferralTracker>,
        config: EngineConfig,
    ) -> Self {
        let engine = DealEngine::new(repo.clone(), ledger.clone(), clock.clone(), referrals, config);
        let queries = DealQueries::new(
            repo.clone(),
            TokenResolver::new(repo.clone(), ledger.clone()),
            clock.clone(),
        );
        let reconciler = Reconciler::new(engine.clone(), repo.clone(), ledger, clock);
        Self {
            repo,
            engine: Arc::new(engine),
            queries: Arc::new(queries),
            reconciler,
        }
    }

    pub fn app_state(&self) -> api::AppState {
        api::AppState::new(self.repo.clone(), self.engine.clone(), self.queries.clone())
    }
}
