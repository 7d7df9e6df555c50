use bsg_common::Money;
use mockall::mock;
use settlement_engine::{
    db_types::{
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
        NonceRecord,
    },
    traits::{LedgerStore, LedgerStoreError},
};

mock! {
    pub Ledger {}
    impl Clone for Ledger {
        fn clone(&self) -> Self;
    }
    impl LedgerStore for Ledger {
        fn url(&self) -> &str;
        async fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, LedgerStoreError>;
        async fn fetch_booking_by_chain_id(&self, id: &ChainBookingId) -> Result<Option<Booking>, LedgerStoreError>;
        async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, LedgerStoreError>;
        async fn update_booking(&self, id: &BookingId, update: BookingUpdate) -> Result<Booking, LedgerStoreError>;
        async fn update_booking_from(
            &self,
            id: &BookingId,
            from: &[BookingStatus],
            update: BookingUpdate,
        ) -> Result<Option<Booking>, LedgerStoreError>;
        async fn insert_nonce(&self, record: NonceRecord) -> Result<(), LedgerStoreError>;
        async fn fetch_event(&self, dedup_key: &str) -> Result<Option<EventRecord>, LedgerStoreError>;
        async fn upsert_event(&self, event: NewEventRecord) -> Result<EventRecord, LedgerStoreError>;
        async fn mark_event_failed(&self, dedup_key: &str, error: &str) -> Result<(), LedgerStoreError>;
        async fn append_transaction(&self, tx: NewEarningsTransaction) -> Result<bool, LedgerStoreError>;
        async fn sum_transactions_for_provider(&self, provider_id: &str) -> Result<Money, LedgerStoreError>;
        async fn update_provider_earnings(&self, provider_id: &str, total: Money) -> Result<(), LedgerStoreError>;
        async fn fetch_provider_earnings(&self, provider_id: &str) -> Result<Option<Money>, LedgerStoreError>;
        async fn fetch_active_policies(&self) -> Result<Vec<CancellationPolicy>, LedgerStoreError>;
        async fn fetch_policy(&self, id: i64) -> Result<Option<CancellationPolicy>, LedgerStoreError>;
        async fn insert_policy(&self, policy: NewCancellationPolicy) -> Result<CancellationPolicy, LedgerStoreError>;
    }
}
