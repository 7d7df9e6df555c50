//! `SqliteDatabase` is a concrete implementation of a settlement engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::{fmt::Debug, time::Duration};

use bsg_common::Money;
use log::*;
use sqlx::SqlitePool;

use super::db::{bookings, chain_events, db_url, earnings, new_pool, nonces, policies, queue};
use crate::{
    chain::ChainEventEnvelope,
    db_types::{
        Booking,
        BookingId,
        BookingStatus,
        BookingUpdate,
        CancellationPolicy,
        ChainBookingId,
        EarningsTransaction,
        EventRecord,
        NewBooking,
        NewCancellationPolicy,
        NewEarningsTransaction,
        NewEventRecord,
        Nonce,
        NonceRecord,
    },
    traits::{LedgerStore, LedgerStoreError, QueueBackend, QueueEntry},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl LedgerStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(bookings::fetch_booking(id, &mut conn).await?)
    }

    async fn fetch_booking_by_chain_id(&self, id: &ChainBookingId) -> Result<Option<Booking>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(bookings::fetch_booking_by_chain_id(id, &mut conn).await?)
    }

    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        bookings::insert_booking(booking, &mut conn).await
    }

    async fn update_booking(&self, id: &BookingId, update: BookingUpdate) -> Result<Booking, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        bookings::update_booking(id, update, &mut conn)
            .await?
            .ok_or_else(|| LedgerStoreError::BookingNotFound(id.clone()))
    }

    async fn update_booking_from(
        &self,
        id: &BookingId,
        from: &[BookingStatus],
        update: BookingUpdate,
    ) -> Result<Option<Booking>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        if let Some(booking) = bookings::update_booking_from(id, from, update, &mut conn).await? {
            return Ok(Some(booking));
        }
        match bookings::fetch_booking(id, &mut conn).await? {
            Some(booking) => {
                trace!("🗃️ Booking {id} is {}. Update skipped.", booking.status);
                Ok(None)
            },
            None => Err(LedgerStoreError::BookingNotFound(id.clone())),
        }
    }

    async fn insert_nonce(&self, record: NonceRecord) -> Result<(), LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        let nonce = record.nonce;
        nonces::insert_nonce(record, &mut conn).await?;
        trace!("🗃️ Nonce {nonce} recorded");
        Ok(())
    }

    async fn fetch_event(&self, dedup_key: &str) -> Result<Option<EventRecord>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(chain_events::fetch_event(dedup_key, &mut conn).await?)
    }

    async fn upsert_event(&self, event: NewEventRecord) -> Result<EventRecord, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(chain_events::upsert_event(event, &mut conn).await?)
    }

    async fn mark_event_failed(&self, dedup_key: &str, error: &str) -> Result<(), LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        chain_events::mark_event_failed(dedup_key, error, &mut conn).await
    }

    async fn append_transaction(&self, tx: NewEarningsTransaction) -> Result<bool, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(earnings::append_transaction(tx, &mut conn).await?)
    }

    async fn sum_transactions_for_provider(&self, provider_id: &str) -> Result<Money, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(earnings::sum_transactions_for_provider(provider_id, &mut conn).await?)
    }

    async fn update_provider_earnings(&self, provider_id: &str, total: Money) -> Result<(), LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        earnings::update_provider_earnings(provider_id, total, &mut conn).await?;
        debug!("🗃️ Provider {provider_id} earnings set to {total}");
        Ok(())
    }

    async fn fetch_provider_earnings(&self, provider_id: &str) -> Result<Option<Money>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(earnings::fetch_provider_earnings(provider_id, &mut conn).await?)
    }

    async fn fetch_active_policies(&self) -> Result<Vec<CancellationPolicy>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(policies::fetch_active_policies(&mut conn).await?)
    }

    async fn fetch_policy(&self, id: i64) -> Result<Option<CancellationPolicy>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(policies::fetch_policy(id, &mut conn).await?)
    }

    async fn insert_policy(&self, policy: NewCancellationPolicy) -> Result<CancellationPolicy, LedgerStoreError> {
        let mut tx = self.pool.begin().await?;
        let policy = policies::insert_policy(policy, &mut tx).await?;
        tx.commit().await?;
        Ok(policy)
    }
}

impl QueueBackend for SqliteDatabase {
    async fn enqueue(&self, envelope: &ChainEventEnvelope) -> Result<i64, LedgerStoreError> {
        let payload = envelope.to_json().map_err(|e| LedgerStoreError::Serialization(e.to_string()))?;
        let mut conn = self.pool.acquire().await?;
        Ok(queue::enqueue(payload, &mut conn).await?)
    }

    /// Entries whose payload can no longer be read are logged and removed, so they cannot block the queue.
    async fn claim_batch(&self, limit: usize, lease: Duration) -> Result<Vec<QueueEntry>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let lease = i64::try_from(lease.as_secs()).unwrap_or(i64::MAX);
        let rows = queue::claim_batch(limit, lease, &mut conn).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            match ChainEventEnvelope::from_json(&row.payload) {
                Ok(envelope) => entries.push(QueueEntry { id: row.id, envelope, enqueued_at: row.enqueued_at }),
                Err(e) => {
                    error!(
                        "📥️ Queue entry #{} is unreadable and will be discarded. {e}. Payload: {}",
                        row.id, row.payload
                    );
                    queue::ack(row.id, &mut conn).await?;
                },
            }
        }
        Ok(entries)
    }

    async fn ack(&self, id: i64) -> Result<(), LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        queue::ack(id, &mut conn).await?;
        trace!("📥️ Queue entry #{id} acknowledged");
        Ok(())
    }

    async fn depth(&self) -> Result<u64, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        let depth = queue::depth(&mut conn).await?;
        Ok(u64::try_from(depth).unwrap_or_default())
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Applies any outstanding schema migrations.
    pub async fn migrate(&self) -> Result<(), LedgerStoreError> {
        sqlx::migrate!("./src/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerStoreError::DatabaseError(format!("Migration failed. {e}")))?;
        info!("🗃️ Database migrations are up to date");
        Ok(())
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn fetch_nonce(&self, nonce: &Nonce) -> Result<Option<NonceRecord>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(nonces::fetch_nonce(nonce, &mut conn).await?)
    }

    pub async fn fetch_transactions_for_provider(
        &self,
        provider_id: &str,
    ) -> Result<Vec<EarningsTransaction>, LedgerStoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(earnings::fetch_transactions_for_provider(provider_id, &mut conn).await?)
    }
}
