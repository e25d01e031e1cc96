//! Repository layer for database operations.
//!
//! Methods are organized across submodules by table:
//! - `deals.rs` - Deal rows and consumed payment transactions
//! - `participations.rs` - Per-player streak rows
//! - `tokens.rs` - Cached token metadata
//!
//! Statements that must share a transaction with a ledger call are associated
//! functions taking `&mut SqliteConnection`; callers pass `&mut *tx`.

mod deals;
mod participations;
mod tokens;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};

pub use deals::ListedDeal;

/// Repository for database operations.
#[derive(Debug)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Start a transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Whether `err` is a UNIQUE / PRIMARY KEY constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| decode_error(format!("timestamp out of range: {}", ms)))
}

pub(crate) fn decode_error(message: impl Into<String>) -> sqlx::Error {
    let message: String = message.into();
    sqlx::Error::Decode(message.into())
}
