use sqlx::SqliteConnection;

use crate::{
    db_types::{Nonce, NonceRecord},
    traits::LedgerStoreError,
};

/// Write-once insert. The primary key on `nonce` turns a second insert into [`LedgerStoreError::NonceAlreadyUsed`].
pub async fn insert_nonce(record: NonceRecord, conn: &mut SqliteConnection) -> Result<(), LedgerStoreError> {
    let nonce = record.nonce;
    sqlx::query("INSERT INTO authorization_nonces (nonce, booking_id, kind, created_at) VALUES ($1, $2, $3, $4)")
        .bind(record.nonce)
        .bind(record.booking_id)
        .bind(record.kind)
        .bind(record.created_at)
        .execute(conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(err) if err.is_unique_violation() => LedgerStoreError::NonceAlreadyUsed(nonce),
            _ => LedgerStoreError::from(e),
        })?;
    Ok(())
}

pub async fn fetch_nonce(nonce: &Nonce, conn: &mut SqliteConnection) -> Result<Option<NonceRecord>, sqlx::Error> {
    let record =
        sqlx::query_as("SELECT * FROM authorization_nonces WHERE nonce = $1").bind(*nonce).fetch_optional(conn).await?;
    Ok(record)
}
