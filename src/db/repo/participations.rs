//! Participation rows: one per (deal, player).

use crate::domain::participation::count_interval;
use crate::domain::{Address, DealId, Participation, TxHash};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::deals::parse_tx_hash;
use super::{decode_error, from_ms, to_ms, Repository};

const SELECT_PARTICIPATIONS: &str = r#"
    SELECT deal_id, player_address, counter, last_count_update_ms,
           join_tx_hash, join_time_ms, reward_sent_tx_hash
    FROM participations
"#;

impl Repository {
    /// Insert a fresh row with counter 0.
    ///
    /// # Errors
    /// A second insert for the same pair fails with a unique violation.
    pub async fn insert_participation(
        conn: &mut SqliteConnection,
        deal_id: DealId,
        player: &Address,
        join_time: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO participations (deal_id, player_address, counter, join_time_ms)
            VALUES (?, ?, 0, ?)
            "#,
        )
        .bind(deal_id.as_i64())
        .bind(player.as_str())
        .bind(to_ms(join_time))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn set_join_tx_hash(
        conn: &mut SqliteConnection,
        deal_id: DealId,
        player: &Address,
        tx_hash: &TxHash,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE participations SET join_tx_hash = ? WHERE deal_id = ? AND player_address = ?",
        )
        .bind(tx_hash.as_str())
        .bind(deal_id.as_i64())
        .bind(player.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get_participation(
        &self,
        deal_id: DealId,
        player: &Address,
    ) -> Result<Option<Participation>, sqlx::Error> {
        let sql = format!(
            "{} WHERE deal_id = ? AND player_address = ?",
            SELECT_PARTICIPATIONS
        );
        let row = sqlx::query(&sql)
            .bind(deal_id.as_i64())
            .bind(player.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(participation_from_row).transpose()
    }

    /// All rows for a deal in join order.
    pub async fn participations_for_deal(
        &self,
        deal_id: DealId,
    ) -> Result<Vec<Participation>, sqlx::Error> {
        let sql = format!(
            "{} WHERE deal_id = ? ORDER BY join_time_ms, player_address",
            SELECT_PARTICIPATIONS
        );
        let rows = sqlx::query(&sql)
            .bind(deal_id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(participation_from_row).collect()
    }

    /// Zero the streak and stamp `at`. Rewarded rows are left untouched.
    ///
    /// Returns `false` if no unrewarded row matched.
    pub async fn reset_count(
        &self,
        deal_id: DealId,
        player: &Address,
        at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE participations SET counter = 0, last_count_update_ms = ?
            WHERE deal_id = ? AND player_address = ? AND reward_sent_tx_hash IS NULL
            "#,
        )
        .bind(to_ms(at))
        .bind(deal_id.as_i64())
        .bind(player.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Increment the streak and stamp `at`, returning the new counter.
    ///
    /// Returns `None` if the row is missing, already rewarded, or was
    /// counted less than one interval before `at`.
    pub async fn advance_count(
        conn: &mut SqliteConnection,
        deal_id: DealId,
        player: &Address,
        at: DateTime<Utc>,
    ) -> Result<Option<u32>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE participations SET counter = counter + 1, last_count_update_ms = ?
            WHERE deal_id = ? AND player_address = ? AND reward_sent_tx_hash IS NULL
              AND (last_count_update_ms IS NULL OR last_count_update_ms <= ?)
            RETURNING counter
            "#,
        )
        .bind(to_ms(at))
        .bind(deal_id.as_i64())
        .bind(player.as_str())
        .bind(to_ms(at - count_interval()))
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let counter: i64 = row.try_get("counter")?;
                Ok(Some(counter_from_i64(counter)?))
            }
            None => Ok(None),
        }
    }

    /// Make the row terminal. Returns `false` if it already carried a reward hash.
    pub async fn set_reward_tx_hash(
        conn: &mut SqliteConnection,
        deal_id: DealId,
        player: &Address,
        tx_hash: &TxHash,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE participations SET reward_sent_tx_hash = ?
            WHERE deal_id = ? AND player_address = ? AND reward_sent_tx_hash IS NULL
            "#,
        )
        .bind(tx_hash.as_str())
        .bind(deal_id.as_i64())
        .bind(player.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn counter_from_i64(raw: i64) -> Result<u32, sqlx::Error> {
    u32::try_from(raw).map_err(|_| decode_error(format!("counter out of range: {}", raw)))
}

fn participation_from_row(row: &SqliteRow) -> Result<Participation, sqlx::Error> {
    let player: String = row.try_get("player_address")?;
    let last_update: Option<i64> = row.try_get("last_count_update_ms")?;

    Ok(Participation {
        deal_id: DealId::new(row.try_get("deal_id")?),
        player: Address::parse(&player).map_err(|e| decode_error(e.to_string()))?,
        counter: counter_from_i64(row.try_get("counter")?)?,
        last_count_update: last_update.map(from_ms).transpose()?,
        join_tx_hash: parse_tx_hash(row.try_get("join_tx_hash")?)?,
        join_time: from_ms(row.try_get("join_time_ms")?)?,
        reward_sent_tx_hash: parse_tx_hash(row.try_get("reward_sent_tx_hash")?)?,
    })
}
