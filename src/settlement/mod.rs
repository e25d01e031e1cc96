//! Settlement reconciler.
//!
//! A run walks every activated, not-yet-ended deal: deals past their holding
//! window are ended on the ledger, and for the rest each eligible player's
//! balance is checked and their streak reset, advanced, or paid out. Failures
//! are isolated per deal and per player; nothing is retried within a run.

mod processor;

pub use processor::PlayerOutcome;

use crate::clock::Clock;
use crate::db::Repository;
use crate::ledger::Ledger;
use crate::lifecycle::DealEngine;
use processor::DealProcessor;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Counters for one reconciler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub deals_seen: usize,
    pub deals_ended: usize,
    pub deals_failed: usize,
    pub players_advanced: usize,
    pub players_reset: usize,
    pub players_rewarded: usize,
    pub players_failed: usize,
    /// Rows already terminal when the run started.
    pub rewards_already_sent: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    engine: DealEngine,
    repo: Arc<Repository>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        engine: DealEngine,
        repo: Arc<Repository>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            repo,
            ledger,
            clock,
        }
    }

    /// Settle every eligible deal once.
    ///
    /// # Errors
    /// Only fails if the eligible deals cannot be listed.
    pub async fn run_once(&self) -> Result<RunSummary, sqlx::Error> {
        let now = self.clock.now();
        let deals = self.repo.settlement_candidates().await?;
        let processor = DealProcessor {
            engine: &self.engine,
            repo: &self.repo,
            ledger: self.ledger.as_ref(),
            now,
        };

        let mut summary = RunSummary {
            deals_seen: deals.len(),
            ..RunSummary::default()
        };

        for deal in &deals {
            if let Err(e) = processor.process(deal, &mut summary).await {
                error!(deal_id = %deal.id, error = %e, "Deal settlement failed");
                summary.deals_failed += 1;
            }
        }

        info!(
            deals = summary.deals_seen,
            ended = summary.deals_ended,
            failed = summary.deals_failed,
            advanced = summary.players_advanced,
            reset = summary.players_reset,
            rewarded = summary.players_rewarded,
            players_failed = summary.players_failed,
            "Settlement run complete"
        );
        Ok(summary)
    }

    /// Run on a fixed interval, starting immediately. Never returns.
    pub async fn run_forever(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Settlement run aborted: could not list deals");
            }
        }
    }
}
