//! Read side: deal views combining stored rows, participants, and token data.

mod tokens;

pub use tokens::TokenResolver;

use crate::clock::Clock;
use crate::db::{ListedDeal, Repository};
use crate::domain::{Address, Chain, Deal, DealId, DealStatus, Decimal, TokenDetails, TxHash};
use crate::ledger::LedgerError;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Number of deals returned by the featured listing.
pub const FEATURED_LIMIT: usize = 3;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Which deals to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealFilter {
    /// Deals rewarding holders of this token.
    ByCoin(Address),
    /// Deals this player joined.
    ByPlayer(Address),
    /// Deals created by this owner.
    ByOwner(Address),
    /// Top deals by total reward value.
    Featured,
    /// Every live deal.
    All,
}

/// External view of a deal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DealDetails {
    pub id: DealId,
    pub name: String,
    pub description: Option<String>,
    pub contract_address: Address,
    pub coin_owner_address: Address,
    pub minimum_amount_to_hold: Decimal,
    pub minimum_days_to_hold: u32,
    pub reward: Decimal,
    pub max_rewards: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub chain: Chain,
    pub code: Option<String>,
    pub creation_tx_hash: Option<TxHash>,
    pub creation_date: DateTime<Utc>,
    pub commission_paid: bool,
    pub commission_date: Option<DateTime<Utc>>,
    pub activated: bool,
    pub activation_date: Option<DateTime<Utc>>,
    pub done: bool,
    pub status: DealStatus,
    pub total_players: usize,
    pub rewarded_players: usize,
    pub players: Vec<Address>,
    pub token_name: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub token_logo: Option<String>,
    pub token_price: Decimal,
    /// Whether the requesting player was paid; only set on player listings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewarded: Option<bool>,
}

impl DealDetails {
    /// `reward × token price × max rewards`, clamped at the representable maximum.
    pub fn total_reward_value(&self) -> Decimal {
        self.reward
            .saturating_mul(self.token_price)
            .saturating_mul(Decimal::from(self.max_rewards))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeaturedDeals {
    pub featured: Vec<DealDetails>,
    /// Deals currently inside their start..end+holding window.
    pub active: i64,
}

#[derive(Debug, Clone)]
pub struct DealQueries {
    repo: Arc<Repository>,
    tokens: TokenResolver,
    clock: Arc<dyn Clock>,
}

impl DealQueries {
    pub fn new(repo: Arc<Repository>, tokens: TokenResolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            tokens,
            clock,
        }
    }

    pub fn tokens(&self) -> &TokenResolver {
        &self.tokens
    }

    /// A single deal, or `None` if it does not exist or its token cannot be
    /// resolved.
    pub async fn get(&self, deal_id: DealId) -> Result<Option<DealDetails>, QueryError> {
        let Some(deal) = self.repo.get_deal(deal_id).await? else {
            return Ok(None);
        };
        self.details(deal, None).await
    }

    pub async fn list(&self, filter: DealFilter) -> Result<Vec<DealDetails>, QueryError> {
        let now = self.clock.now();
        let listed: Vec<ListedDeal> = match &filter {
            DealFilter::ByCoin(coin) => unlisted(self.repo.deals_by_coin(coin).await?),
            DealFilter::ByPlayer(player) => self.repo.deals_for_player(player).await?,
            DealFilter::ByOwner(owner) => unlisted(self.repo.deals_by_owner(owner).await?),
            DealFilter::Featured => unlisted(self.repo.featured_candidates(now).await?),
            DealFilter::All => unlisted(self.repo.live_deals().await?),
        };
        let player_scoped = matches!(filter, DealFilter::ByPlayer(_));

        let resolved = join_all(listed.into_iter().map(|l| {
            let rewarded = player_scoped.then_some(l.rewarded);
            self.details(l.deal, rewarded)
        }))
        .await;

        let mut deals = Vec::with_capacity(resolved.len());
        for result in resolved {
            match result {
                Ok(Some(details)) => deals.push(details),
                Ok(None) => {}
                Err(QueryError::Ledger(e)) => {
                    warn!(error = %e, "Skipping deal: token lookup failed");
                }
                Err(e) => return Err(e),
            }
        }

        if filter == DealFilter::Featured {
            deals.sort_by(|a, b| b.total_reward_value().cmp(&a.total_reward_value()));
            deals.truncate(FEATURED_LIMIT);
        }
        Ok(deals)
    }

    /// Every live deal.
    pub async fn explore(&self) -> Result<Vec<DealDetails>, QueryError> {
        self.list(DealFilter::All).await
    }

    pub async fn featured(&self) -> Result<FeaturedDeals, QueryError> {
        let featured = self.list(DealFilter::Featured).await?;
        let active = self.repo.count_active_deals(self.clock.now()).await?;
        Ok(FeaturedDeals { featured, active })
    }

    async fn details(
        &self,
        deal: Deal,
        rewarded: Option<bool>,
    ) -> Result<Option<DealDetails>, QueryError> {
        let Some(token) = self
            .tokens
            .resolve(&deal.terms.contract_address, &deal.terms.chain)
            .await?
        else {
            warn!(deal_id = %deal.id, token = %deal.terms.contract_address, "Skipping deal: unknown token");
            return Ok(None);
        };

        let participations = self.repo.participations_for_deal(deal.id).await?;
        let rewarded_players = participations.iter().filter(|p| p.is_rewarded()).count();
        let players = participations.into_iter().map(|p| p.player).collect();

        Ok(Some(assemble(
            deal,
            token,
            players,
            rewarded_players,
            rewarded,
            self.clock.now(),
        )))
    }
}

fn unlisted(deals: Vec<Deal>) -> Vec<ListedDeal> {
    deals
        .into_iter()
        .map(|deal| ListedDeal {
            deal,
            rewarded: false,
        })
        .collect()
}

fn assemble(
    deal: Deal,
    token: TokenDetails,
    players: Vec<Address>,
    rewarded_players: usize,
    rewarded: Option<bool>,
    now: DateTime<Utc>,
) -> DealDetails {
    let status = deal.status(now);
    let terms = deal.terms;
    DealDetails {
        id: deal.id,
        name: terms.name,
        description: terms.description,
        contract_address: terms.contract_address,
        coin_owner_address: terms.coin_owner_address,
        minimum_amount_to_hold: terms.minimum_amount_to_hold,
        minimum_days_to_hold: terms.minimum_days_to_hold,
        reward: terms.reward,
        max_rewards: terms.max_rewards,
        start_date: terms.start_date,
        end_date: terms.end_date,
        chain: terms.chain,
        code: terms.referral_code,
        creation_tx_hash: deal.creation_tx_hash,
        creation_date: deal.creation_date,
        commission_paid: deal.commission.is_some(),
        commission_date: deal.commission.map(|c| c.at),
        activated: deal.activation.is_some(),
        activation_date: deal.activation.map(|a| a.at),
        done: deal.done,
        status,
        total_players: players.len(),
        rewarded_players,
        players,
        token_name: token.metadata.name,
        token_symbol: token.metadata.symbol,
        token_decimals: token.metadata.decimals,
        token_logo: token.metadata.logo,
        token_price: token.price,
        rewarded,
    }
}
