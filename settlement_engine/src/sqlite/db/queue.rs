use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

#[derive(Debug, Clone, FromRow)]
pub struct QueueRow {
    pub id: i64,
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Appends an entry. The insert has completed (and, outside a transaction, committed) when this returns.
pub async fn enqueue(payload: String, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO event_queue (payload, enqueued_at) VALUES ($1, $2)")
        .bind(payload)
        .bind(Utc::now())
        .execute(conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Claims up to `limit` entries from the head of the queue. An entry is claimable if it was never claimed, or if its
/// claim is older than `lease_secs`.
pub async fn claim_batch(
    limit: i64,
    lease_secs: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<QueueRow>, sqlx::Error> {
    let now = Utc::now().timestamp();
    let mut rows: Vec<QueueRow> = sqlx::query_as(
        r#"
            UPDATE event_queue SET claimed_at = $1
            WHERE id IN (
                SELECT id FROM event_queue
                WHERE claimed_at IS NULL OR claimed_at <= $2
                ORDER BY id
                LIMIT $3
            )
            RETURNING id, payload, enqueued_at;
        "#,
    )
    .bind(now)
    .bind(now - lease_secs)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    rows.sort_by_key(|r| r.id);
    Ok(rows)
}

pub async fn ack(id: i64, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM event_queue WHERE id = $1").bind(id).execute(conn).await?;
    Ok(())
}

pub async fn depth(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM event_queue").fetch_one(conn).await?;
    Ok(count)
}
