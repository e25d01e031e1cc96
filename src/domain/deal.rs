//! Deal terms, lifecycle record, and derived status.

use crate::domain::{Address, Chain, DealId, Decimal, TxHash};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Creation request as supplied by a caller, before address validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDeal {
    pub name: String,
    pub description: Option<String>,
    pub contract_address: String,
    pub coin_owner_address: String,
    pub minimum_amount_to_hold: Decimal,
    pub minimum_days_to_hold: u32,
    pub reward: Decimal,
    pub max_rewards: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub referral_code: Option<String>,
}

/// Immutable terms of a deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealTerms {
    pub name: String,
    pub description: Option<String>,
    /// Reward token contract.
    pub contract_address: Address,
    pub coin_owner_address: Address,
    pub minimum_amount_to_hold: Decimal,
    pub minimum_days_to_hold: u32,
    /// Paid to each rewarded player.
    pub reward: Decimal,
    pub max_rewards: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub chain: Chain,
    pub referral_code: Option<String>,
}

impl DealTerms {
    /// Total pool the owner must fund on activation: `reward × max_rewards`.
    ///
    /// `None` if the product does not fit in a `Decimal`.
    pub fn reward_pool(&self) -> Option<Decimal> {
        self.reward.checked_mul(Decimal::from(self.max_rewards))
    }

    /// `end_date + minimum_days_to_hold`, or `None` past the representable range.
    pub fn checked_settlement_deadline(&self) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(self.minimum_days_to_hold))
            .and_then(|days| self.end_date.checked_add_signed(days))
    }

    /// Instant after which the deal is finished and no more players can qualify.
    ///
    /// Saturates at the latest representable instant.
    pub fn settlement_deadline(&self) -> DateTime<Utc> {
        self.checked_settlement_deadline()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A transaction hash together with when it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_hash: TxHash,
    pub at: DateTime<Utc>,
}

/// A persisted deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub terms: DealTerms,
    pub creation_tx_hash: Option<TxHash>,
    pub creation_date: DateTime<Utc>,
    pub commission: Option<TxRecord>,
    pub activation: Option<TxRecord>,
    pub done: bool,
    pub end_tx_hash: Option<TxHash>,
}

impl Deal {
    pub fn commission_paid(&self) -> bool {
        self.commission.is_some()
    }

    pub fn activated(&self) -> bool {
        self.activation.is_some()
    }

    /// Commission paid and pool funded; players may join within the date window.
    pub fn is_live(&self) -> bool {
        self.commission_paid() && self.activated()
    }

    pub fn status(&self, now: DateTime<Utc>) -> DealStatus {
        if self.done || now >= self.terms.settlement_deadline() {
            DealStatus::Ended
        } else if !self.commission_paid() {
            DealStatus::AwaitingCommission
        } else if !self.activated() {
            DealStatus::AwaitingActivation
        } else if now < self.terms.start_date {
            DealStatus::Upcoming
        } else if now <= self.terms.end_date {
            DealStatus::Open
        } else {
            DealStatus::Settling
        }
    }
}

/// Externally visible activity status of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    AwaitingCommission,
    AwaitingActivation,
    Upcoming,
    /// Accepting joins.
    Open,
    /// Past the end date; existing players can still complete their streaks.
    Settling,
    Ended,
}

/// Which payment a transaction is presented as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPurpose {
    /// Fee paid to the commission account.
    Commission,
    /// Reward pool paid into the contract custody address.
    Activation,
}

impl fmt::Display for TransferPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPurpose::Commission => write!(f, "commission"),
            TransferPurpose::Activation => write!(f, "activation"),
        }
    }
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
