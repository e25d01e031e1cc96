//! Token metadata with a storage cache, plus live prices.

use super::QueryError;
use crate::db::Repository;
use crate::domain::{Address, CachedTokenDetails, Chain, Decimal, TokenDetails};
use crate::ledger::Ledger;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct TokenResolver {
    repo: Arc<Repository>,
    ledger: Arc<dyn Ledger>,
}

impl TokenResolver {
    pub fn new(repo: Arc<Repository>, ledger: Arc<dyn Ledger>) -> Self {
        Self { repo, ledger }
    }

    /// Metadata from cache (filled from the ledger on a miss) and a live price.
    ///
    /// Returns `None` if the ledger does not know the token. A missing price
    /// is reported as zero.
    pub async fn resolve(
        &self,
        token: &Address,
        chain: &Chain,
    ) -> Result<Option<TokenDetails>, QueryError> {
        let metadata = match self.repo.get_cached_token(token, chain).await? {
            Some(cached) => cached.metadata,
            None => {
                let Some(metadata) = self.ledger.token_details(token).await? else {
                    debug!(token = %token, chain = %chain, "Token not resolvable");
                    return Ok(None);
                };
                let cached = CachedTokenDetails {
                    address: token.clone(),
                    chain: chain.clone(),
                    metadata,
                };
                if let Err(e) = self.repo.insert_cached_token(&cached).await {
                    warn!(token = %token, error = %e, "Failed to cache token metadata");
                }
                cached.metadata
            }
        };

        let price = match self.ledger.token_price(token).await? {
            Some(price) => price,
            None => {
                debug!(token = %token, "No price for token");
                Decimal::zero()
            }
        };

        Ok(Some(TokenDetails { metadata, price }))
    }
}
