use bsg_common::Money;
use thiserror::Error;

use crate::db_types::{
    Booking,
    BookingId,
    BookingStatus,
    BookingUpdate,
    CancellationPolicy,
    ChainBookingId,
    EventRecord,
    NewBooking,
    NewCancellationPolicy,
    NewEarningsTransaction,
    NewEventRecord,
    Nonce,
    NonceRecord,
};

#[derive(Debug, Clone, Error)]
pub enum LedgerStoreError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("Booking {0} does not exist")]
    BookingNotFound(BookingId),
    #[error("Booking {0} already exists")]
    BookingAlreadyExists(BookingId),
    #[error("Nonce {0} has already been used")]
    NonceAlreadyUsed(Nonce),
    #[error("No event record exists for {0}")]
    EventNotFound(String),
    #[error("Invalid cancellation policy. {0}")]
    InvalidPolicy(String),
    #[error("Could not (de)serialize stored data. {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for LedgerStoreError {
    fn from(e: sqlx::Error) -> Self {
        LedgerStoreError::DatabaseError(e.to_string())
    }
}

impl LedgerStoreError {
    /// Infrastructure errors that may succeed when retried, as opposed to data errors that never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError(_))
    }
}

/// Persistence for everything the settlement engine reads and writes.
///
/// Every write is either an absolute-value update or an insert guarded by a uniqueness constraint, so replaying
/// any sequence of calls converges on the same state.
#[allow(async_fn_in_trait)]
pub trait LedgerStore: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    async fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, LedgerStoreError>;

    async fn fetch_booking_by_chain_id(&self, id: &ChainBookingId) -> Result<Option<Booking>, LedgerStoreError>;

    /// Stores a new booking. The on-chain identifier is derived from the booking id here, once.
    ///
    /// Fails with [`LedgerStoreError::BookingAlreadyExists`] if the id is taken.
    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, LedgerStoreError>;

    /// Applies `update` and returns the updated record. An empty update returns the record unchanged.
    async fn update_booking(&self, id: &BookingId, update: BookingUpdate) -> Result<Booking, LedgerStoreError>;

    /// Applies `update` only if the booking's status is one of `from`, checking and writing in a single step.
    /// Returns `None`, having written nothing, if the booking is in any other state.
    ///
    /// Fails with [`LedgerStoreError::BookingNotFound`] if the booking does not exist.
    async fn update_booking_from(
        &self,
        id: &BookingId,
        from: &[BookingStatus],
        update: BookingUpdate,
    ) -> Result<Option<Booking>, LedgerStoreError>;

    /// Write-once. Fails with [`LedgerStoreError::NonceAlreadyUsed`] if the nonce exists.
    async fn insert_nonce(&self, record: NonceRecord) -> Result<(), LedgerStoreError>;

    async fn fetch_event(&self, dedup_key: &str) -> Result<Option<EventRecord>, LedgerStoreError>;

    /// Inserts or overwrites the event record for `event.dedup_key`, marking it PROCESSED and clearing any previous
    /// error.
    async fn upsert_event(&self, event: NewEventRecord) -> Result<EventRecord, LedgerStoreError>;

    async fn mark_event_failed(&self, dedup_key: &str, error: &str) -> Result<(), LedgerStoreError>;

    /// Appends to the transaction ledger unless a row with the same `(tx_hash, kind)` exists. Returns `true` if a row
    /// was written.
    async fn append_transaction(&self, tx: NewEarningsTransaction) -> Result<bool, LedgerStoreError>;

    async fn sum_transactions_for_provider(&self, provider_id: &str) -> Result<Money, LedgerStoreError>;

    async fn update_provider_earnings(&self, provider_id: &str, total: Money) -> Result<(), LedgerStoreError>;

    async fn fetch_provider_earnings(&self, provider_id: &str) -> Result<Option<Money>, LedgerStoreError>;

    async fn fetch_active_policies(&self) -> Result<Vec<CancellationPolicy>, LedgerStoreError>;

    async fn fetch_policy(&self, id: i64) -> Result<Option<CancellationPolicy>, LedgerStoreError>;

    /// Stores a new policy. Fails with [`LedgerStoreError::InvalidPolicy`] unless its three percentages sum to 100.
    async fn insert_policy(&self, policy: NewCancellationPolicy) -> Result<CancellationPolicy, LedgerStoreError>;
}
