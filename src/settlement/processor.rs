//! Settlement of a single deal.

use super::RunSummary;
use crate::db::Repository;
use crate::domain::{Deal, Participation};
use crate::ledger::Ledger;
use crate::lifecycle::{AdvanceOutcome, DealEngine, DealError};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// What happened to one player in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerOutcome {
    /// Balance check failed; streak zeroed.
    Reset,
    Advanced { counter: u32 },
    Rewarded { counter: u32 },
    /// Already advanced within the last day.
    Waiting,
    /// Row changed underneath us; nothing done.
    Skipped,
}

pub(crate) struct DealProcessor<'a> {
    pub engine: &'a DealEngine,
    pub repo: &'a Repository,
    pub ledger: &'a dyn Ledger,
    pub now: DateTime<Utc>,
}

impl DealProcessor<'_> {
    /// End the deal if its holding window is over, otherwise walk its
    /// working set. Player failures are counted, not returned.
    pub async fn process(&self, deal: &Deal, summary: &mut RunSummary) -> Result<(), DealError> {
        if self.now >= deal.terms.settlement_deadline() {
            self.engine.mark_ended(deal.id).await?;
            summary.deals_ended += 1;
            return Ok(());
        }

        let participations = self.repo.participations_for_deal(deal.id).await?;
        let rewarded = participations.iter().filter(|p| p.is_rewarded()).count();
        summary.rewards_already_sent += rewarded;

        let working_set: Vec<&Participation> = participations
            .iter()
            .filter(|p| p.is_in_working_set(self.now))
            .collect();
        debug!(
            deal_id = %deal.id,
            players = participations.len(),
            rewarded,
            working_set = working_set.len(),
            "Settling deal"
        );

        for participation in working_set {
            match self.process_player(deal, participation).await {
                Ok(PlayerOutcome::Reset) => summary.players_reset += 1,
                Ok(PlayerOutcome::Advanced { .. }) => summary.players_advanced += 1,
                Ok(PlayerOutcome::Rewarded { .. }) => {
                    summary.players_advanced += 1;
                    summary.players_rewarded += 1;
                }
                Ok(PlayerOutcome::Waiting) | Ok(PlayerOutcome::Skipped) => {}
                Err(e) => {
                    warn!(
                        deal_id = %deal.id,
                        player = %participation.player,
                        error = %e,
                        "Player settlement failed; will retry next run"
                    );
                    summary.players_failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn process_player(
        &self,
        deal: &Deal,
        participation: &Participation,
    ) -> Result<PlayerOutcome, DealError> {
        let has_balance = self
            .ledger
            .does_user_have_balance(
                &participation.player,
                &deal.terms.contract_address,
                deal.terms.minimum_amount_to_hold,
            )
            .await?;

        if !has_balance {
            self.engine
                .reset_count(deal.id, &participation.player)
                .await?;
            debug!(deal_id = %deal.id, player = %participation.player, "Streak reset");
            return Ok(PlayerOutcome::Reset);
        }

        if !participation.is_due_for_advance(self.now) {
            return Ok(PlayerOutcome::Waiting);
        }

        let outcome = self
            .engine
            .advance_count(deal.id, participation, deal.terms.minimum_days_to_hold)
            .await?;
        Ok(match outcome {
            AdvanceOutcome::Advanced { counter } => PlayerOutcome::Advanced { counter },
            AdvanceOutcome::Rewarded { counter, tx_hash } => {
                info!(deal_id = %deal.id, player = %participation.player, tx_hash = %tx_hash, "Player rewarded");
                PlayerOutcome::Rewarded { counter }
            }
            AdvanceOutcome::Skipped => PlayerOutcome::Skipped,
        })
    }
}
