//! Deal rows and consumed payment transactions.

use crate::domain::{
    Address, Chain, Deal, DealId, DealTerms, Decimal, TransferPurpose, TxHash, TxRecord,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{decode_error, from_ms, to_ms, Repository};

const MS_PER_DAY: i64 = 86_400_000;

macro_rules! select_deals {
    ($tail:literal) => {
        concat!(
            r#"
            SELECT d.id, d.name, d.description, d.contract_address, d.coin_owner_address,
                   d.minimum_amount_to_hold, d.minimum_days_to_hold, d.reward, d.max_rewards,
                   d.start_date_ms, d.end_date_ms, d.chain, d.referral_code,
                   d.creation_tx_hash, d.creation_date_ms,
                   d.commission_tx_hash, d.commission_date_ms,
                   d.activation_tx_hash, d.activation_date_ms,
                   d.done, d.end_tx_hash
            FROM deals d
            "#,
            $tail
        )
    };
}

/// A deal as listed for one player, with whether that player was already paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDeal {
    pub deal: Deal,
    pub rewarded: bool,
}

impl Repository {
    /// Insert the deal row with no transaction hashes set.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_deal(
        conn: &mut SqliteConnection,
        terms: &DealTerms,
        created_at: DateTime<Utc>,
    ) -> Result<DealId, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO deals (
                name, description, contract_address, coin_owner_address,
                minimum_amount_to_hold, minimum_days_to_hold, reward, max_rewards,
                start_date_ms, end_date_ms, chain, referral_code, creation_date_ms
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&terms.name)
        .bind(terms.description.as_deref())
        .bind(terms.contract_address.as_str())
        .bind(terms.coin_owner_address.as_str())
        .bind(terms.minimum_amount_to_hold.to_canonical_string())
        .bind(i64::from(terms.minimum_days_to_hold))
        .bind(terms.reward.to_canonical_string())
        .bind(i64::from(terms.max_rewards))
        .bind(to_ms(terms.start_date))
        .bind(to_ms(terms.end_date))
        .bind(terms.chain.as_str())
        .bind(terms.referral_code.as_deref())
        .bind(to_ms(created_at))
        .execute(&mut *conn)
        .await?;

        Ok(DealId::new(result.last_insert_rowid()))
    }

    pub async fn set_creation_tx_hash(
        conn: &mut SqliteConnection,
        deal_id: DealId,
        tx_hash: &TxHash,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE deals SET creation_tx_hash = ? WHERE id = ?")
            .bind(tx_hash.as_str())
            .bind(deal_id.as_i64())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the query fails or the row cannot be decoded.
    pub async fn get_deal(&self, deal_id: DealId) -> Result<Option<Deal>, sqlx::Error> {
        let row = sqlx::query(select_deals!("WHERE d.id = ?"))
            .bind(deal_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(deal_from_row).transpose()
    }

    /// Deals whose reward token is `coin`, newest first.
    pub async fn deals_by_coin(&self, coin: &Address) -> Result<Vec<Deal>, sqlx::Error> {
        let rows = sqlx::query(select_deals!(
            "WHERE d.contract_address = ? ORDER BY d.id DESC"
        ))
        .bind(coin.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(deal_from_row).collect()
    }

    /// Deals created by `owner`, newest first.
    pub async fn deals_by_owner(&self, owner: &Address) -> Result<Vec<Deal>, sqlx::Error> {
        let rows = sqlx::query(select_deals!(
            "WHERE d.coin_owner_address = ? ORDER BY d.id DESC"
        ))
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(deal_from_row).collect()
    }

    /// Deals `player` has joined, newest first.
    pub async fn deals_for_player(&self, player: &Address) -> Result<Vec<ListedDeal>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.name, d.description, d.contract_address, d.coin_owner_address,
                   d.minimum_amount_to_hold, d.minimum_days_to_hold, d.reward, d.max_rewards,
                   d.start_date_ms, d.end_date_ms, d.chain, d.referral_code,
                   d.creation_tx_hash, d.creation_date_ms,
                   d.commission_tx_hash, d.commission_date_ms,
                   d.activation_tx_hash, d.activation_date_ms,
                   d.done, d.end_tx_hash,
                   p.reward_sent_tx_hash
            FROM deals d
            JOIN participations p ON p.deal_id = d.id
            WHERE p.player_address = ?
            ORDER BY d.id DESC
            "#,
        )
        .bind(player.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let reward: Option<String> = row.try_get("reward_sent_tx_hash")?;
                Ok(ListedDeal {
                    deal: deal_from_row(row)?,
                    rewarded: reward.is_some(),
                })
            })
            .collect()
    }

    /// Commission-paid and activated deals, newest first.
    pub async fn live_deals(&self) -> Result<Vec<Deal>, sqlx::Error> {
        let rows = sqlx::query(select_deals!(
            r#"
            WHERE d.commission_tx_hash IS NOT NULL AND d.activation_tx_hash IS NOT NULL
            ORDER BY d.id DESC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(deal_from_row).collect()
    }

    /// Activated deals whose end date is still ahead of `now`.
    pub async fn featured_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Deal>, sqlx::Error> {
        let rows = sqlx::query(select_deals!(
            r#"
            WHERE d.activation_tx_hash IS NOT NULL AND d.end_date_ms > ?
            ORDER BY d.id
            "#
        ))
        .bind(to_ms(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(deal_from_row).collect()
    }

    /// Activated deals not yet ended on chain; the reconciler's working set of deals.
    pub async fn settlement_candidates(&self) -> Result<Vec<Deal>, sqlx::Error> {
        let rows = sqlx::query(select_deals!(
            "WHERE d.done = 0 AND d.activation_tx_hash IS NOT NULL ORDER BY d.id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(deal_from_row).collect()
    }

    /// Deals with `start <= now < end + minimum_days_to_hold`, regardless of payment state.
    pub async fn count_active_deals(&self, now: DateTime<Utc>) -> Result<i64, sqlx::Error> {
        let now_ms = to_ms(now);
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM deals
            WHERE start_date_ms <= ?
              AND end_date_ms + minimum_days_to_hold * ? > ?
            "#,
        )
        .bind(now_ms)
        .bind(MS_PER_DAY)
        .bind(now_ms)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Whether `tx_hash` was already accepted as a payment for any deal.
    pub async fn is_transaction_used(&self, tx_hash: &TxHash) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM used_transactions WHERE tx_hash = ?")
            .bind(tx_hash.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Record `tx_hash` as the deal's commission or activation payment.
    ///
    /// Both the global used-hash claim and the per-deal column are written in
    /// one transaction. Returns `false` if the column was already set; a hash
    /// already claimed anywhere surfaces as a unique violation.
    ///
    /// # Errors
    /// Returns an error if either statement fails.
    pub async fn record_payment(
        &self,
        deal_id: DealId,
        purpose: TransferPurpose,
        tx_hash: &TxHash,
        at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO used_transactions (tx_hash, deal_id, purpose, used_at_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(tx_hash.as_str())
        .bind(deal_id.as_i64())
        .bind(purpose.to_string())
        .bind(to_ms(at))
        .execute(&mut *tx)
        .await?;

        let update = match purpose {
            TransferPurpose::Commission => {
                r#"
                UPDATE deals SET commission_tx_hash = ?, commission_date_ms = ?
                WHERE id = ? AND commission_tx_hash IS NULL
                "#
            }
            TransferPurpose::Activation => {
                r#"
                UPDATE deals SET activation_tx_hash = ?, activation_date_ms = ?
                WHERE id = ? AND activation_tx_hash IS NULL
                "#
            }
        };
        let result = sqlx::query(update)
            .bind(tx_hash.as_str())
            .bind(to_ms(at))
            .bind(deal_id.as_i64())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Set `done` and the end hash. Returns `false` if the deal was already done.
    pub async fn mark_deal_ended(
        &self,
        deal_id: DealId,
        tx_hash: &TxHash,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE deals SET done = 1, end_tx_hash = ? WHERE id = ? AND done = 0")
                .bind(tx_hash.as_str())
                .bind(deal_id.as_i64())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_address(raw: String) -> Result<Address, sqlx::Error> {
    Address::parse(&raw).map_err(|e| decode_error(e.to_string()))
}

fn parse_decimal(raw: &str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str_canonical(raw).map_err(|e| decode_error(format!("{}: {}", raw, e)))
}

fn parse_u32(raw: i64, column: &str) -> Result<u32, sqlx::Error> {
    u32::try_from(raw).map_err(|_| decode_error(format!("{} out of range: {}", column, raw)))
}

pub(super) fn parse_tx_hash(raw: Option<String>) -> Result<Option<TxHash>, sqlx::Error> {
    raw.map(|s| TxHash::parse(&s).map_err(|e| decode_error(e.to_string())))
        .transpose()
}

fn tx_record(hash: Option<String>, at_ms: Option<i64>) -> Result<Option<TxRecord>, sqlx::Error> {
    match (parse_tx_hash(hash)?, at_ms) {
        (Some(tx_hash), Some(ms)) => Ok(Some(TxRecord {
            tx_hash,
            at: from_ms(ms)?,
        })),
        _ => Ok(None),
    }
}

fn deal_from_row(row: &SqliteRow) -> Result<Deal, sqlx::Error> {
    let min_amount: String = row.try_get("minimum_amount_to_hold")?;
    let reward: String = row.try_get("reward")?;

    let terms = DealTerms {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        contract_address: parse_address(row.try_get("contract_address")?)?,
        coin_owner_address: parse_address(row.try_get("coin_owner_address")?)?,
        minimum_amount_to_hold: parse_decimal(&min_amount)?,
        minimum_days_to_hold: parse_u32(row.try_get("minimum_days_to_hold")?, "minimum_days_to_hold")?,
        reward: parse_decimal(&reward)?,
        max_rewards: parse_u32(row.try_get("max_rewards")?, "max_rewards")?,
        start_date: from_ms(row.try_get("start_date_ms")?)?,
        end_date: from_ms(row.try_get("end_date_ms")?)?,
        chain: Chain::new(row.try_get::<String, _>("chain")?),
        referral_code: row.try_get("referral_code")?,
    };

    Ok(Deal {
        id: DealId::new(row.try_get("id")?),
        terms,
        creation_tx_hash: parse_tx_hash(row.try_get("creation_tx_hash")?)?,
        creation_date: from_ms(row.try_get("creation_date_ms")?)?,
        commission: tx_record(
            row.try_get("commission_tx_hash")?,
            row.try_get("commission_date_ms")?,
        )?,
        activation: tx_record(
            row.try_get("activation_tx_hash")?,
            row.try_get("activation_date_ms")?,
        )?,
        done: row.try_get::<i64, _>("done")? != 0,
        end_tx_hash: parse_tx_hash(row.try_get("end_tx_hash")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::is_unique_violation;
    use crate::db::repo::test_support::{addr, setup_test_db, t0, terms};
    use chrono::Duration;

    fn hash(b: u8) -> TxHash {
        TxHash::from_bytes(&[b; 32])
    }

    async fn insert(repo: &Repository, terms: &DealTerms) -> DealId {
        let mut conn = repo.pool().acquire().await.unwrap();
        Repository::insert_deal(&mut conn, terms, t0()).await.unwrap()
    }

    async fn insert_live(repo: &Repository, terms: &DealTerms, seed: u8) -> DealId {
        let id = insert(repo, terms).await;
        assert!(repo
            .record_payment(id, TransferPurpose::Commission, &hash(seed), t0())
            .await
            .unwrap());
        assert!(repo
            .record_payment(id, TransferPurpose::Activation, &hash(seed + 1), t0())
            .await
            .unwrap());
        id
    }

    #[tokio::test]
    async fn test_insert_and_get_deal() {
        let (repo, _temp) = setup_test_db().await;
        let t = terms();

        let mut tx = repo.begin().await.unwrap();
        let id = Repository::insert_deal(&mut tx, &t, t0()).await.unwrap();
        Repository::set_creation_tx_hash(&mut tx, id, &hash(1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let deal = repo.get_deal(id).await.unwrap().expect("deal exists");
        assert_eq!(deal.terms, t);
        assert_eq!(deal.creation_tx_hash, Some(hash(1)));
        assert_eq!(deal.creation_date, t0());
        assert!(deal.commission.is_none());
        assert!(deal.activation.is_none());
        assert!(!deal.done);

        assert!(repo.get_deal(DealId::new(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rolled_back_insert_leaves_no_row() {
        let (repo, _temp) = setup_test_db().await;

        let mut tx = repo.begin().await.unwrap();
        let id = Repository::insert_deal(&mut tx, &terms(), t0()).await.unwrap();
        drop(tx);

        assert!(repo.get_deal(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_payment_sets_once() {
        let (repo, _temp) = setup_test_db().await;
        let id = insert(&repo, &terms()).await;

        assert!(repo
            .record_payment(id, TransferPurpose::Commission, &hash(1), t0())
            .await
            .unwrap());
        assert!(!repo
            .record_payment(id, TransferPurpose::Commission, &hash(2), t0())
            .await
            .unwrap());

        let deal = repo.get_deal(id).await.unwrap().unwrap();
        assert_eq!(deal.commission.unwrap().tx_hash, hash(1));
        assert!(repo.is_transaction_used(&hash(1)).await.unwrap());
        // The losing claim was rolled back with its column update.
        assert!(!repo.is_transaction_used(&hash(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_payment_hash_cannot_be_reused_across_deals_or_purposes() {
        let (repo, _temp) = setup_test_db().await;
        let a = insert(&repo, &terms()).await;
        let b = insert(&repo, &terms()).await;

        repo.record_payment(a, TransferPurpose::Commission, &hash(1), t0())
            .await
            .unwrap();

        let err = repo
            .record_payment(a, TransferPurpose::Activation, &hash(1), t0())
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        let err = repo
            .record_payment(b, TransferPurpose::Commission, &hash(1), t0())
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        let b_deal = repo.get_deal(b).await.unwrap().unwrap();
        assert!(b_deal.commission.is_none());
    }

    #[tokio::test]
    async fn test_listings() {
        let (repo, _temp) = setup_test_db().await;
        let t = terms();
        let mut other = terms();
        other.contract_address = addr('a');
        other.coin_owner_address = addr('b');

        let pending = insert(&repo, &t).await;
        let live = insert_live(&repo, &t, 10).await;
        let other_live = insert_live(&repo, &other, 20).await;

        let by_coin: Vec<DealId> = repo
            .deals_by_coin(&t.contract_address)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(by_coin, vec![live, pending]);

        let by_owner: Vec<DealId> = repo
            .deals_by_owner(&addr('b'))
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(by_owner, vec![other_live]);

        let live_ids: Vec<DealId> = repo
            .live_deals()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(live_ids, vec![other_live, live]);

        let candidates = repo.settlement_candidates().await.unwrap();
        assert_eq!(candidates.len(), 2);

        assert!(repo.mark_deal_ended(live, &hash(99)).await.unwrap());
        assert!(!repo.mark_deal_ended(live, &hash(98)).await.unwrap());
        let candidates: Vec<DealId> = repo
            .settlement_candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(candidates, vec![other_live]);

        let ended = repo.get_deal(live).await.unwrap().unwrap();
        assert!(ended.done);
        assert_eq!(ended.end_tx_hash, Some(hash(99)));
    }

    #[tokio::test]
    async fn test_deals_for_player_reports_reward_flag() {
        let (repo, _temp) = setup_test_db().await;
        let id = insert_live(&repo, &terms(), 1).await;
        let player = addr('c');

        sqlx::query(
            "INSERT INTO participations (deal_id, player_address, join_time_ms, reward_sent_tx_hash) VALUES (?, ?, ?, ?)",
        )
        .bind(id.as_i64())
        .bind(player.as_str())
        .bind(to_ms(t0()))
        .bind(hash(7).as_str())
        .execute(repo.pool())
        .await
        .unwrap();

        let listed = repo.deals_for_player(&player).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].deal.id, id);
        assert!(listed[0].rewarded);

        assert!(repo.deals_for_player(&addr('d')).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_featured_candidates_and_active_count() {
        let (repo, _temp) = setup_test_db().await;
        let t = terms();
        let live = insert_live(&repo, &t, 1).await;
        insert(&repo, &t).await;

        // Before start: nothing active, but the live deal is a candidate.
        let before = t0() - Duration::days(1);
        assert_eq!(repo.count_active_deals(before).await.unwrap(), 0);
        let ids: Vec<DealId> = repo
            .featured_candidates(before)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![live]);

        // Both rows count once started, payment state aside.
        assert_eq!(repo.count_active_deals(t0()).await.unwrap(), 2);

        // Past the end date but inside the holding window.
        let settling = t.end_date + Duration::days(1);
        assert_eq!(repo.count_active_deals(settling).await.unwrap(), 2);
        assert!(repo.featured_candidates(settling).await.unwrap().is_empty());

        let finished = t.settlement_deadline();
        assert_eq!(repo.count_active_deals(finished).await.unwrap(), 0);
    }
}
