use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use bsg_common::Money;
use chrono::Utc;

use crate::{
    db_types::{
        Booking,
        BookingId,
        BookingStatus,
        BookingUpdate,
        CancellationPolicy,
        ChainBookingId,
        EarningsTransaction,
        EventRecord,
        EventStatus,
        NewBooking,
        NewCancellationPolicy,
        NewEarningsTransaction,
        NewEventRecord,
        NonceRecord,
    },
    traits::{LedgerStore, LedgerStoreError},
};

#[derive(Default)]
struct LedgerState {
    bookings: HashMap<BookingId, Booking>,
    nonces: HashMap<String, NonceRecord>,
    events: HashMap<String, EventRecord>,
    transactions: Vec<EarningsTransaction>,
    earnings: HashMap<String, Money>,
    policies: Vec<CancellationPolicy>,
    fail_writes: bool,
}

/// An in-memory [`LedgerStore`] with the same uniqueness rules as the SQLite backend.
///
/// Writes can be made to fail with a transient error via [`MemoryLedger::fail_writes`].
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().expect("memory ledger lock poisoned")
    }

    fn lock_for_write(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerStoreError> {
        let state = self.lock();
        if state.fail_writes {
            return Err(LedgerStoreError::DatabaseError("simulated write failure".into()));
        }
        Ok(state)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn transactions(&self) -> Vec<EarningsTransaction> {
        self.lock().transactions.clone()
    }

    /// Drops every event record, as if the processed-event table had been lost.
    pub fn forget_events(&self) {
        self.lock().events.clear();
    }
}

impl LedgerStore for MemoryLedger {
    fn url(&self) -> &str {
        "memory://"
    }

    async fn fetch_booking(&self, id: &BookingId) -> Result<Option<Booking>, LedgerStoreError> {
        Ok(self.lock().bookings.get(id).cloned())
    }

    async fn fetch_booking_by_chain_id(&self, id: &ChainBookingId) -> Result<Option<Booking>, LedgerStoreError> {
        Ok(self.lock().bookings.values().find(|b| b.chain_booking_id == *id).cloned())
    }

    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, LedgerStoreError> {
        let mut state = self.lock_for_write()?;
        if state.bookings.contains_key(&booking.id) {
            return Err(LedgerStoreError::BookingAlreadyExists(booking.id));
        }
        let now = Utc::now();
        let record = Booking {
            chain_booking_id: ChainBookingId::derive(&booking.id),
            id: booking.id,
            customer_id: booking.customer_id,
            customer_wallet: booking.customer_wallet,
            provider_id: booking.provider_id,
            provider_wallet: booking.provider_wallet,
            referrer_id: booking.referrer_id,
            referrer_wallet: booking.referrer_wallet,
            status: BookingStatus::Pending,
            scheduled_at: booking.scheduled_at,
            total_amount: booking.total_amount,
            paid_amount: None,
            platform_fee_rate: None,
            referrer_fee_rate: None,
            payment_tx_hash: None,
            paid_at: None,
            completion_tx_hash: None,
            completed_at: None,
            cancellation_tx_hash: None,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            meeting_link: booking.meeting_link,
            created_at: now,
            updated_at: now,
        };
        state.bookings.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_booking(&self, id: &BookingId, update: BookingUpdate) -> Result<Booking, LedgerStoreError> {
        let mut state = self.lock_for_write()?;
        let booking = state.bookings.get_mut(id).ok_or_else(|| LedgerStoreError::BookingNotFound(id.clone()))?;
        if !update.is_empty() {
            update.apply_to(booking);
            booking.updated_at = Utc::now();
        }
        Ok(booking.clone())
    }

    async fn update_booking_from(
        &self,
        id: &BookingId,
        from: &[BookingStatus],
        update: BookingUpdate,
    ) -> Result<Option<Booking>, LedgerStoreError> {
        let mut state = self.lock_for_write()?;
        let booking = state.bookings.get_mut(id).ok_or_else(|| LedgerStoreError::BookingNotFound(id.clone()))?;
        if !from.is_empty() && !from.contains(&booking.status) {
            return Ok(None);
        }
        if !update.is_empty() {
            update.apply_to(booking);
            booking.updated_at = Utc::now();
        }
        Ok(Some(booking.clone()))
    }

    async fn insert_nonce(&self, record: NonceRecord) -> Result<(), LedgerStoreError> {
        let mut state = self.lock_for_write()?;
        let key = record.nonce.to_string();
        if state.nonces.contains_key(&key) {
            return Err(LedgerStoreError::NonceAlreadyUsed(record.nonce));
        }
        state.nonces.insert(key, record);
        Ok(())
    }

    async fn fetch_event(&self, dedup_key: &str) -> Result<Option<EventRecord>, LedgerStoreError> {
        Ok(self.lock().events.get(dedup_key).cloned())
    }

    async fn upsert_event(&self, event: NewEventRecord) -> Result<EventRecord, LedgerStoreError> {
        let mut state = self.lock_for_write()?;
        let now = Utc::now();
        let created_at = state.events.get(&event.dedup_key).map(|e| e.created_at).unwrap_or(now);
        let record = EventRecord {
            dedup_key: event.dedup_key,
            event_type: event.event_type,
            booking_chain_id: event.booking_chain_id,
            tx_hash: event.tx_hash,
            log_index: event.log_index,
            block_number: event.block_number,
            payload: event.payload,
            status: EventStatus::Processed,
            error: None,
            created_at,
            updated_at: now,
        };
        state.events.insert(record.dedup_key.clone(), record.clone());
        Ok(record)
    }

    async fn mark_event_failed(&self, dedup_key: &str, error: &str) -> Result<(), LedgerStoreError> {
        let mut state = self.lock_for_write()?;
        let record =
            state.events.get_mut(dedup_key).ok_or_else(|| LedgerStoreError::EventNotFound(dedup_key.to_string()))?;
        record.status = EventStatus::Failed;
        record.error = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn append_transaction(&self, tx: NewEarningsTransaction) -> Result<bool, LedgerStoreError> {
        let mut state = self.lock_for_write()?;
        if state.transactions.iter().any(|t| t.tx_hash == tx.tx_hash && t.kind == tx.kind) {
            return Ok(false);
        }
        let id = state.transactions.len() as i64 + 1;
        state.transactions.push(EarningsTransaction {
            id,
            provider_id: tx.provider_id,
            booking_id: tx.booking_id,
            tx_hash: tx.tx_hash,
            kind: tx.kind,
            amount: tx.amount,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn sum_transactions_for_provider(&self, provider_id: &str) -> Result<Money, LedgerStoreError> {
        Ok(self.lock().transactions.iter().filter(|t| t.provider_id == provider_id).map(|t| t.amount).sum())
    }

    async fn update_provider_earnings(&self, provider_id: &str, total: Money) -> Result<(), LedgerStoreError> {
        self.lock_for_write()?.earnings.insert(provider_id.to_string(), total);
        Ok(())
    }

    async fn fetch_provider_earnings(&self, provider_id: &str) -> Result<Option<Money>, LedgerStoreError> {
        Ok(self.lock().earnings.get(provider_id).copied())
    }

    async fn fetch_active_policies(&self) -> Result<Vec<CancellationPolicy>, LedgerStoreError> {
        Ok(self.lock().policies.iter().filter(|p| p.active).cloned().collect())
    }

    async fn fetch_policy(&self, id: i64) -> Result<Option<CancellationPolicy>, LedgerStoreError> {
        Ok(self.lock().policies.iter().find(|p| p.id == id).cloned())
    }

    async fn insert_policy(&self, policy: NewCancellationPolicy) -> Result<CancellationPolicy, LedgerStoreError> {
        if !policy.percentages_sum_to_100() {
            return Err(LedgerStoreError::InvalidPolicy(format!("Percentages for {} do not sum to 100", policy.key)));
        }
        let mut state = self.lock_for_write()?;
        if state.policies.iter().any(|p| p.key == policy.key) {
            return Err(LedgerStoreError::InvalidPolicy(format!("A policy with key {} already exists", policy.key)));
        }
        let record = CancellationPolicy {
            id: state.policies.len() as i64 + 1,
            key: policy.key,
            name: policy.name,
            description: policy.description,
            active: policy.active,
            conditions: policy.conditions,
            customer_refund_pct: policy.customer_refund_pct,
            provider_earnings_pct: policy.provider_earnings_pct,
            platform_fee_pct: policy.platform_fee_pct,
        };
        state.policies.push(record.clone());
        Ok(record)
    }
}
