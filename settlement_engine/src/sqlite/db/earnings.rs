use bsg_common::Money;
use chrono::Utc;
use sqlx::SqliteConnection;

use crate::db_types::{EarningsTransaction, NewEarningsTransaction};

/// Appends the transaction unless one with the same `(tx_hash, kind)` is already recorded. Returns whether a row was
/// written.
pub async fn append_transaction(tx: NewEarningsTransaction, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO transactions (provider_id, booking_id, tx_hash, kind, amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tx_hash, kind) DO NOTHING;
        "#,
    )
    .bind(tx.provider_id)
    .bind(tx.booking_id)
    .bind(tx.tx_hash)
    .bind(tx.kind)
    .bind(tx.amount)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_transactions_for_provider(
    provider_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<EarningsTransaction>, sqlx::Error> {
    let txs = sqlx::query_as("SELECT * FROM transactions WHERE provider_id = $1 ORDER BY id")
        .bind(provider_id)
        .fetch_all(conn)
        .await?;
    Ok(txs)
}

/// Amounts are stored as exact decimal text, so they are summed here rather than by SQLite's floating point `SUM`.
pub async fn sum_transactions_for_provider(
    provider_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Money, sqlx::Error> {
    let amounts: Vec<Money> = sqlx::query_scalar("SELECT amount FROM transactions WHERE provider_id = $1")
        .bind(provider_id)
        .fetch_all(conn)
        .await?;
    Ok(amounts.into_iter().sum())
}

pub async fn update_provider_earnings(
    provider_id: &str,
    total: Money,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO provider_earnings (provider_id, total, updated_at) VALUES ($1, $2, $3)
            ON CONFLICT (provider_id) DO UPDATE SET total = excluded.total, updated_at = excluded.updated_at;
        "#,
    )
    .bind(provider_id)
    .bind(total)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_provider_earnings(
    provider_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Money>, sqlx::Error> {
    let total = sqlx::query_scalar("SELECT total FROM provider_earnings WHERE provider_id = $1")
        .bind(provider_id)
        .fetch_optional(conn)
        .await?;
    Ok(total)
}
