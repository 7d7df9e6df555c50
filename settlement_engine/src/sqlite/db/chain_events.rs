use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{
    db_types::{EventRecord, EventStatus, NewEventRecord},
    traits::LedgerStoreError,
};

pub async fn fetch_event(dedup_key: &str, conn: &mut SqliteConnection) -> Result<Option<EventRecord>, sqlx::Error> {
    let record =
        sqlx::query_as("SELECT * FROM chain_events WHERE dedup_key = $1").bind(dedup_key).fetch_optional(conn).await?;
    Ok(record)
}

/// Inserts the event, or overwrites an earlier attempt at it. Either way the record ends up PROCESSED with no error.
pub async fn upsert_event(event: NewEventRecord, conn: &mut SqliteConnection) -> Result<EventRecord, sqlx::Error> {
    let now = Utc::now();
    let rows: Vec<EventRecord> = sqlx::query_as(
        r#"
            INSERT INTO chain_events (
                dedup_key,
                event_type,
                booking_chain_id,
                tx_hash,
                log_index,
                block_number,
                payload,
                status,
                error,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL, $9, $9)
            ON CONFLICT (dedup_key) DO UPDATE SET
                event_type = excluded.event_type,
                payload = excluded.payload,
                status = excluded.status,
                error = NULL,
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(event.dedup_key)
    .bind(event.event_type)
    .bind(event.booking_chain_id)
    .bind(event.tx_hash)
    .bind(event.log_index)
    .bind(event.block_number)
    .bind(event.payload)
    .bind(EventStatus::Processed)
    .bind(now)
    .fetch_all(conn)
    .await?;
    rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)
}

pub async fn mark_event_failed(
    dedup_key: &str,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<(), LedgerStoreError> {
    let result = sqlx::query("UPDATE chain_events SET status = $1, error = $2, updated_at = $3 WHERE dedup_key = $4")
        .bind(EventStatus::Failed)
        .bind(error)
        .bind(Utc::now())
        .bind(dedup_key)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(LedgerStoreError::EventNotFound(dedup_key.to_string()));
    }
    Ok(())
}
