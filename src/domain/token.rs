//! Token metadata and price.

use crate::domain::{Address, Chain, Decimal};
use serde::{Deserialize, Serialize};

/// Metadata that does not change for a deployed token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub logo: Option<String>,
}

/// Metadata row cached per (address, chain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTokenDetails {
    pub address: Address,
    pub chain: Chain,
    pub metadata: TokenMetadata,
}

/// Metadata combined with a freshly fetched price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDetails {
    #[serde(flatten)]
    pub metadata: TokenMetadata,
    pub price: Decimal,
}
