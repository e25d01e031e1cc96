//! Ledger abstraction: the on-chain side of a deal.
//!
//! The deals contract holds the reward pool and executes payouts; this trait
//! is everything the service needs from it, plus token lookups and transfer
//! verification against the chain.

use crate::domain::{Address, Deal, DealId, DealTerms, Decimal, TokenMetadata, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod gateway;
pub mod mock;

pub use crate::domain::TransferPurpose;
pub use gateway::GatewayLedger;
pub use mock::{LedgerCall, LedgerOp, MockLedger};

#[async_trait]
pub trait Ledger: Send + Sync + fmt::Debug {
    /// Well-formed chain address check.
    fn is_valid_address(&self, address: &str) -> bool {
        Address::is_valid(address)
    }

    /// Register the deal on the contract.
    async fn create_deal(&self, deal_id: DealId, terms: &DealTerms) -> Result<TxHash, LedgerError>;

    /// Mark a funded deal as active on the contract.
    async fn activate(&self, deal_id: DealId) -> Result<(), LedgerError>;

    /// Register a participant on the contract.
    async fn join(&self, deal_id: DealId, player: &Address) -> Result<TxHash, LedgerError>;

    /// Close the deal; the contract returns any unclaimed pool to the owner.
    async fn mark_deal_ended(&self, deal_id: DealId) -> Result<TxHash, LedgerError>;

    /// Pay the reward to a player that completed their streak.
    async fn update_count(&self, deal_id: DealId, player: &Address) -> Result<TxHash, LedgerError>;

    /// Whether `player` currently holds at least `minimum` of `token` (in whole token units).
    async fn does_user_have_balance(
        &self,
        player: &Address,
        token: &Address,
        minimum: Decimal,
    ) -> Result<bool, LedgerError>;

    /// Token metadata, or None if the address does not resolve to a token.
    async fn token_details(&self, token: &Address) -> Result<Option<TokenMetadata>, LedgerError>;

    /// Current USD price of the token, if known.
    async fn token_price(&self, token: &Address) -> Result<Option<Decimal>, LedgerError>;

    /// Check that `tx_hash` is a confirmed transfer satisfying `expected` for `deal`.
    async fn verify_transaction(
        &self,
        deal: &Deal,
        tx_hash: &TxHash,
        expected: &ExpectedTransfer,
    ) -> Result<bool, LedgerError>;
}

/// What a valid payment transaction must look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedTransfer {
    pub purpose: TransferPurpose,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub minimum_amount: Decimal,
}

/// A confirmed token transfer as observed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: Decimal,
}

impl ObservedTransfer {
    pub fn satisfies(&self, expected: &ExpectedTransfer) -> bool {
        self.token == expected.token
            && self.from == expected.from
            && self.to == expected.to
            && self.amount >= expected.minimum_amount
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The chain or gateway refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),
}
