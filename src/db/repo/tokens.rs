//! Cached token metadata keyed by (address, chain).

use crate::domain::{Address, CachedTokenDetails, Chain, TokenMetadata};
use sqlx::Row;

use super::{decode_error, Repository};

impl Repository {
    pub async fn get_cached_token(
        &self,
        address: &Address,
        chain: &Chain,
    ) -> Result<Option<CachedTokenDetails>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT name, symbol, decimals, logo
            FROM token_details
            WHERE address = ? AND chain = ?
            "#,
        )
        .bind(address.as_str())
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decimals: i64 = row.try_get("decimals")?;
        let decimals = u8::try_from(decimals)
            .map_err(|_| decode_error(format!("decimals out of range: {}", decimals)))?;

        Ok(Some(CachedTokenDetails {
            address: address.clone(),
            chain: chain.clone(),
            metadata: TokenMetadata {
                name: row.try_get("name")?,
                symbol: row.try_get("symbol")?,
                decimals,
                logo: row.try_get("logo")?,
            },
        }))
    }

    /// Cache metadata for a token. The first write wins.
    ///
    /// Returns `true` if a row was inserted.
    pub async fn insert_cached_token(
        &self,
        details: &CachedTokenDetails,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_details (address, chain, name, symbol, decimals, logo)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(address, chain) DO NOTHING
            "#,
        )
        .bind(details.address.as_str())
        .bind(details.chain.as_str())
        .bind(&details.metadata.name)
        .bind(&details.metadata.symbol)
        .bind(i64::from(details.metadata.decimals))
        .bind(details.metadata.logo.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
