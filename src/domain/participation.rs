//! A player's enrollment in a deal and their holding streak.

use crate::domain::{Address, DealId, TxHash};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Time after joining before a player's streak starts being evaluated.
pub fn join_grace() -> Duration {
    Duration::days(1)
}

/// Minimum spacing between two counter advances for the same player.
pub fn count_interval() -> Duration {
    Duration::days(1)
}

/// One row per (deal, player).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participation {
    pub deal_id: DealId,
    pub player: Address,
    /// Consecutive days the minimum balance has been held.
    pub counter: u32,
    pub last_count_update: Option<DateTime<Utc>>,
    pub join_tx_hash: Option<TxHash>,
    pub join_time: DateTime<Utc>,
    /// Set once the payout has been issued; the row is terminal afterwards.
    pub reward_sent_tx_hash: Option<TxHash>,
}

impl Participation {
    pub fn is_rewarded(&self) -> bool {
        self.reward_sent_tx_hash.is_some()
    }

    /// Past the join grace period and not yet rewarded.
    pub fn is_in_working_set(&self, now: DateTime<Utc>) -> bool {
        !self.is_rewarded() && self.join_time + join_grace() < now
    }

    /// At most one advance per day.
    pub fn is_due_for_advance(&self, now: DateTime<Utc>) -> bool {
        match self.last_count_update {
            None => true,
            Some(last) => last <= now - count_interval(),
        }
    }
}
