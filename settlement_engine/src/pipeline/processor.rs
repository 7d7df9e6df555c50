use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use ethers::types::{Address, U256};
use log::*;
use lru::LruCache;

use crate::{
    chain::{ChainEvent, ChainEventEnvelope},
    db_types::{
        Booking,
        BookingStatus,
        BookingUpdate,
        EventStatus,
        NewEarningsTransaction,
        NewEventRecord,
        TransactionKind,
    },
    events::{BookingStateChanged, ChainEventObserved, EventProducers, MeetingReleaseRequested},
    fees::BASIS_POINTS_SCALE,
    helpers::base_units_to_money,
    pipeline::{MonitorStatus, ProcessingError},
    traits::LedgerStore,
};

pub const DEFAULT_DEDUP_CACHE_SIZE: usize = 10_000;

/// States a payment confirmation may move to `Paid`.
const PAYABLE: [BookingStatus; 3] = [BookingStatus::Pending, BookingStatus::PendingPayment, BookingStatus::Paid];
/// States a completion may move to `Completed`.
const COMPLETABLE: [BookingStatus; 5] = [
    BookingStatus::Pending,
    BookingStatus::PendingPayment,
    BookingStatus::Paid,
    BookingStatus::InProgress,
    BookingStatus::Completed,
];
/// States an on-chain cancellation may move to `Cancelled`.
const CANCELLABLE: [BookingStatus; 6] = [
    BookingStatus::Pending,
    BookingStatus::PendingPayment,
    BookingStatus::Paid,
    BookingStatus::InProgress,
    BookingStatus::Cancelled,
    BookingStatus::Rejected,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// The event changed the ledger.
    Applied,
    /// The event was processed before and was skipped.
    Duplicate,
    /// The event arrived after the booking had moved past the state it describes. It is recorded but changes nothing.
    Stale { status: BookingStatus },
}

enum GuardedUpdate {
    Applied(Booking),
    Stale(BookingStatus),
}

/// Applies chain events to the ledger.
///
/// Processing is idempotent. The durable event record is the source of truth for "already processed"; the in-memory
/// LRU cache of dedup keys is only a fast path in front of it. Every handler writes absolute values, earnings rows are
/// unique per transaction, and provider totals are recomputed by summation, so replaying an event that slipped past
/// both checks still converges on the same state.
pub struct EventProcessor<B> {
    db: B,
    producers: EventProducers,
    token_decimals: u32,
    processed: Mutex<LruCache<String, ()>>,
    status: Arc<MonitorStatus>,
}

impl<B> std::fmt::Debug for EventProcessor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventProcessor")
    }
}

impl<B> EventProcessor<B> {
    pub fn new(db: B, producers: EventProducers, token_decimals: u32, status: Arc<MonitorStatus>) -> Self {
        Self { db, producers, token_decimals, processed: Mutex::new(dedup_cache(DEFAULT_DEDUP_CACHE_SIZE)), status }
    }

    /// Caps the number of dedup keys held in memory. The least recently seen keys are evicted first.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.processed = Mutex::new(dedup_cache(capacity));
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn status(&self) -> &Arc<MonitorStatus> {
        &self.status
    }

    fn is_cached(&self, key: &str) -> bool {
        self.processed.lock().map(|mut cache| cache.get(key).is_some()).unwrap_or(false)
    }

    fn cache(&self, key: &str) {
        if let Ok(mut cache) = self.processed.lock() {
            cache.put(key.to_string(), ());
        }
    }

    fn uncache(&self, key: &str) {
        if let Ok(mut cache) = self.processed.lock() {
            cache.pop(key);
        }
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.processed.lock().map(|cache| cache.len()).unwrap_or_default()
    }
}

fn dedup_cache(capacity: usize) -> LruCache<String, ()> {
    LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
}

impl<B: LedgerStore> EventProcessor<B> {
    /// Processes a single event. On failure the event record is marked FAILED with the error, and the dedup key is
    /// released so that a redelivery gets another chance.
    pub async fn process_event(&self, envelope: &ChainEventEnvelope) -> Result<ProcessingOutcome, ProcessingError> {
        let key = envelope.dedup_key();
        if self.is_cached(&key) {
            trace!("⚙️ {key} is already processed (cached). Skipping.");
            self.status.record_skipped();
            return Ok(ProcessingOutcome::Duplicate);
        }
        if let Some(record) = self.db.fetch_event(&key).await? {
            if record.status == EventStatus::Processed {
                debug!("⚙️ {key} is already processed. Skipping.");
                self.cache(&key);
                self.status.record_skipped();
                return Ok(ProcessingOutcome::Duplicate);
            }
            info!("⚙️ Retrying previously failed event {key}. Last error: {}", record.error.unwrap_or_default());
        }
        self.cache(&key);
        let result = self.record_and_dispatch(&key, envelope).await;
        match &result {
            Ok(outcome) => {
                self.status.record_processed();
                debug!("⚙️ {} {key} for booking {}: {outcome:?}", envelope.kind(), envelope.booking_id());
            },
            Err(e) => {
                self.uncache(&key);
                self.status.record_failed();
                error!("⚙️ {} {key} for booking {} failed. {e}", envelope.kind(), envelope.booking_id());
                if let Err(mark_err) = self.db.mark_event_failed(&key, &e.to_string()).await {
                    error!("⚙️ Could not mark {key} as FAILED. {mark_err}");
                }
            },
        }
        result
    }

    async fn record_and_dispatch(
        &self,
        key: &str,
        envelope: &ChainEventEnvelope,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let record = NewEventRecord {
            dedup_key: key.to_string(),
            event_type: envelope.kind().to_string(),
            booking_chain_id: envelope.booking_id(),
            tx_hash: envelope.tx_hash_hex(),
            log_index: envelope.log_index.and_then(|i| i64::try_from(i).ok()),
            block_number: envelope.block_number.and_then(|n| i64::try_from(n).ok()),
            payload: envelope.event_json()?,
        };
        self.db.upsert_event(record).await?;
        let booking = self
            .db
            .fetch_booking_by_chain_id(&envelope.booking_id())
            .await?
            .ok_or(ProcessingError::BookingNotFound(envelope.booking_id()))?;
        let outcome = match &envelope.event {
            ChainEvent::PaymentConfirmed { amount, platform_fee_rate, referrer_fee_rate, .. } => {
                self.on_payment_confirmed(booking.clone(), envelope, *amount, *platform_fee_rate, *referrer_fee_rate)
                    .await?
            },
            ChainEvent::ServiceCompleted { provider_amount, .. } => {
                self.on_service_completed(booking.clone(), envelope, *provider_amount).await?
            },
            ChainEvent::BookingCancelled { initiator, reason, .. } => {
                self.on_booking_cancelled(booking.clone(), envelope, *initiator, reason).await?
            },
        };
        let observed = ChainEventObserved {
            envelope: envelope.clone(),
            booking_id: booking.id.clone(),
            recipients: booking.participant_ids(),
        };
        self.producers.publish_chain_event_observed(observed).await;
        Ok(outcome)
    }

    async fn on_payment_confirmed(
        &self,
        booking: Booking,
        envelope: &ChainEventEnvelope,
        amount: U256,
        platform_fee_rate: U256,
        referrer_fee_rate: U256,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let update = BookingUpdate {
            status: Some(BookingStatus::Paid),
            paid_amount: Some(base_units_to_money(amount, self.token_decimals)?),
            platform_fee_rate: Some(rate_bps(platform_fee_rate)?),
            referrer_fee_rate: Some(rate_bps(referrer_fee_rate)?),
            payment_tx_hash: envelope.tx_hash_hex(),
            paid_at: Some(envelope.received_at),
            ..Default::default()
        };
        let old_status = booking.status;
        let updated = match self.update_unless_stale(&booking, &PAYABLE, update).await? {
            GuardedUpdate::Applied(updated) => updated,
            GuardedUpdate::Stale(status) => {
                warn!(
                    "⚙️ Payment confirmation for booking {} arrived while it is {status}. Leaving it untouched.",
                    booking.id
                );
                return Ok(ProcessingOutcome::Stale { status });
            },
        };
        info!("⚙️ Booking {} is paid ({})", updated.id, updated.paid_amount.unwrap_or_default());
        self.notify_status_change(updated, old_status).await;
        Ok(ProcessingOutcome::Applied)
    }

    async fn on_service_completed(
        &self,
        booking: Booking,
        envelope: &ChainEventEnvelope,
        provider_amount: U256,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let amount = base_units_to_money(provider_amount, self.token_decimals)?;
        let old_status = booking.status;
        let update = BookingUpdate {
            status: Some(BookingStatus::Completed),
            completion_tx_hash: envelope.tx_hash_hex(),
            completed_at: Some(envelope.received_at),
            ..Default::default()
        };
        let updated = match self.update_unless_stale(&booking, &COMPLETABLE, update).await? {
            GuardedUpdate::Applied(updated) => updated,
            GuardedUpdate::Stale(status) => {
                warn!("⚙️ Completion for booking {} arrived while it is {status}. Leaving it untouched.", booking.id);
                return Ok(ProcessingOutcome::Stale { status });
            },
        };
        let tx_hash = envelope.tx_hash_hex().unwrap_or_else(|| envelope.dedup_key());
        let earnings = NewEarningsTransaction {
            provider_id: booking.provider_id.clone(),
            booking_id: booking.id.clone(),
            tx_hash,
            kind: TransactionKind::ProviderEarnings,
            amount,
        };
        if self.db.append_transaction(earnings).await? {
            debug!("⚙️ {amount} earnings recorded for provider {}", booking.provider_id);
        } else {
            debug!("⚙️ Earnings for booking {} were already recorded", booking.id);
        }
        let total = self.db.sum_transactions_for_provider(&booking.provider_id).await?;
        self.db.update_provider_earnings(&booking.provider_id, total).await?;
        info!("⚙️ Booking {} is complete. Provider {} has earned {total} in total", updated.id, booking.provider_id);
        self.notify_status_change(updated, old_status).await;
        Ok(ProcessingOutcome::Applied)
    }

    async fn on_booking_cancelled(
        &self,
        booking: Booking,
        envelope: &ChainEventEnvelope,
        initiator: Address,
        reason: &str,
    ) -> Result<ProcessingOutcome, ProcessingError> {
        let old_status = booking.status;
        let update = BookingUpdate {
            status: Some(BookingStatus::Cancelled),
            cancellation_tx_hash: envelope.tx_hash_hex(),
            cancellation_reason: Some(reason.to_string()),
            cancelled_by: Some(format!("{initiator:#x}")),
            cancelled_at: Some(envelope.received_at),
            ..Default::default()
        };
        let updated = match self.update_unless_stale(&booking, &CANCELLABLE, update).await? {
            GuardedUpdate::Applied(updated) => updated,
            GuardedUpdate::Stale(status) => {
                warn!("⚙️ Cancellation for booking {} arrived while it is {status}. Leaving it untouched.", booking.id);
                return Ok(ProcessingOutcome::Stale { status });
            },
        };
        info!("⚙️ Booking {} was cancelled on-chain by {initiator:#x}: {reason}", updated.id);
        if let Some(link) = updated.meeting_link.clone() {
            let release = MeetingReleaseRequested { booking_id: updated.id.clone(), meeting_link: link };
            self.producers.publish_meeting_release(release).await;
        }
        self.notify_status_change(updated, old_status).await;
        Ok(ProcessingOutcome::Applied)
    }

    /// Writes `update` only while the booking is still in one of the `from` states. The store checks the status as
    /// part of the write, so a booking that another writer moved on since it was read is not regressed either.
    async fn update_unless_stale(
        &self,
        booking: &Booking,
        from: &[BookingStatus],
        update: BookingUpdate,
    ) -> Result<GuardedUpdate, ProcessingError> {
        if !from.contains(&booking.status) {
            return Ok(GuardedUpdate::Stale(booking.status));
        }
        match self.db.update_booking_from(&booking.id, from, update).await? {
            Some(updated) => Ok(GuardedUpdate::Applied(updated)),
            None => {
                let current = self.db.fetch_booking(&booking.id).await?;
                Ok(GuardedUpdate::Stale(current.map(|b| b.status).unwrap_or(booking.status)))
            },
        }
    }

    async fn notify_status_change(&self, booking: Booking, old_status: BookingStatus) {
        if booking.status != old_status {
            self.producers.publish_booking_state_changed(BookingStateChanged::new(booking, old_status)).await;
        }
    }
}

fn rate_bps(rate: U256) -> Result<i64, ProcessingError> {
    if rate > U256::from(BASIS_POINTS_SCALE) {
        return Err(ProcessingError::InvalidFeeRate(rate));
    }
    Ok(i64::from(rate.low_u32()))
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bsg_common::Money;

    use super::*;
    use crate::{
        db_types::BookingId,
        test_utils::{
            seed_booking,
            sample_cancellation,
            sample_completion,
            sample_payment,
            MemoryLedger,
        },
    };

    fn processor(db: MemoryLedger) -> EventProcessor<MemoryLedger> {
        EventProcessor::new(db, EventProducers::default(), 6, Arc::new(MonitorStatus::default()))
    }

    #[tokio::test]
    async fn payment_confirmation_marks_booking_paid() {
        let db = MemoryLedger::default();
        let booking = seed_booking(&db, "booking-1", BookingStatus::PendingPayment).await;
        let processor = processor(db.clone());
        let outcome = processor.process_event(&sample_payment("booking-1", 0)).await.unwrap();
        assert_eq!(outcome, ProcessingOutcome::Applied);
        let updated = db.fetch_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(updated.status, BookingStatus::Paid);
        assert_eq!(updated.paid_amount, Some(Money::from_units(100)));
        assert_eq!(updated.platform_fee_rate, Some(1000));
        assert!(updated.payment_tx_hash.is_some());
    }

    #[tokio::test]
    async fn replaying_a_completion_is_idempotent() {
        let db = MemoryLedger::default();
        let booking = seed_booking(&db, "booking-1", BookingStatus::InProgress).await;
        let event = sample_completion("booking-1", 4);
        let first = processor(db.clone());
        assert_eq!(first.process_event(&event).await.unwrap(), ProcessingOutcome::Applied);
        let after_first = db.fetch_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(first.process_event(&event).await.unwrap(), ProcessingOutcome::Duplicate);
        // A fresh processor has an empty cache and must fall back on the durable record
        let second = processor(db.clone());
        assert_eq!(second.process_event(&event).await.unwrap(), ProcessingOutcome::Duplicate);
        assert_eq!(db.fetch_booking(&booking.id).await.unwrap().unwrap(), after_first);
        assert_eq!(db.transactions().len(), 1);
        assert_eq!(db.fetch_provider_earnings("provider-1").await.unwrap(), Some(Money::from_str("90").unwrap()));
    }

    #[tokio::test]
    async fn earnings_are_recomputed_not_incremented() {
        let db = MemoryLedger::default();
        seed_booking(&db, "booking-1", BookingStatus::InProgress).await;
        seed_booking(&db, "booking-2", BookingStatus::InProgress).await;
        let processor = processor(db.clone());
        processor.process_event(&sample_completion("booking-1", 0)).await.unwrap();
        processor.process_event(&sample_completion("booking-2", 0)).await.unwrap();
        // Even if the durable record is lost, the unique earnings row prevents double counting
        db.forget_events();
        let fresh = super::EventProcessor::new(db.clone(), EventProducers::default(), 6, Arc::default());
        fresh.process_event(&sample_completion("booking-1", 0)).await.unwrap();
        assert_eq!(db.transactions().len(), 2);
        assert_eq!(db.fetch_provider_earnings("provider-1").await.unwrap(), Some(Money::from_units(180)));
    }

    #[tokio::test]
    async fn missing_booking_is_recorded_as_failed() {
        let db = MemoryLedger::default();
        let processor = processor(db.clone());
        let event = sample_payment("nobody", 0);
        let err = processor.process_event(&event).await.unwrap_err();
        assert!(matches!(err, ProcessingError::BookingNotFound(_)));
        let record = db.fetch_event(&event.dedup_key()).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        assert!(record.error.unwrap().contains("No booking exists"));
        assert_eq!(processor.status().snapshot(None).events_failed, 1);
        // The key was released, so once the booking shows up the event goes through
        seed_booking(&db, "nobody", BookingStatus::PendingPayment).await;
        assert_eq!(processor.process_event(&event).await.unwrap(), ProcessingOutcome::Applied);
        let record = db.fetch_event(&event.dedup_key()).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Processed);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn chain_events_never_regress_a_booking() {
        let db = MemoryLedger::default();
        let booking = seed_booking(&db, "booking-1", BookingStatus::InProgress).await;
        let processor = processor(db.clone());
        processor.process_event(&sample_completion("booking-1", 0)).await.unwrap();
        let outcome = processor.process_event(&sample_payment("booking-1", 1)).await.unwrap();
        assert_eq!(outcome, ProcessingOutcome::Stale { status: BookingStatus::Completed });
        let outcome = processor.process_event(&sample_cancellation("booking-1", 2)).await.unwrap();
        assert_eq!(outcome, ProcessingOutcome::Stale { status: BookingStatus::Completed });
        let stored = db.fetch_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Completed);
        assert!(stored.cancellation_tx_hash.is_none());
    }

    #[tokio::test]
    async fn cancellation_records_reason_and_initiator() {
        let db = MemoryLedger::default();
        let booking = seed_booking(&db, "booking-1", BookingStatus::Paid).await;
        let processor = processor(db.clone());
        processor.process_event(&sample_cancellation("booking-1", 0)).await.unwrap();
        let stored = db.fetch_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("customer_cancel_24h"));
        assert!(stored.cancelled_by.unwrap().starts_with("0x"));
        let completion = processor.process_event(&sample_completion("booking-1", 1)).await.unwrap();
        assert_eq!(completion, ProcessingOutcome::Stale { status: BookingStatus::Cancelled });
        assert!(db.transactions().is_empty());
        let booking = db.fetch_booking(&BookingId::new("booking-1")).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn the_dedup_cache_is_bounded() {
        let db = MemoryLedger::default();
        for id in ["booking-0", "booking-1", "booking-2"] {
            seed_booking(&db, id, BookingStatus::InProgress).await;
        }
        let processor = processor(db.clone()).with_cache_capacity(2);
        for id in ["booking-0", "booking-1", "booking-2"] {
            processor.process_event(&sample_completion(id, 0)).await.unwrap();
        }
        assert_eq!(processor.cached_len(), 2);
        // booking-0 was evicted, so the durable record has to answer
        let outcome = processor.process_event(&sample_completion("booking-0", 0)).await.unwrap();
        assert_eq!(outcome, ProcessingOutcome::Duplicate);
        assert_eq!(processor.cached_len(), 2);
        assert_eq!(db.transactions().len(), 3);
    }

    #[tokio::test]
    async fn out_of_range_fee_rate_fails_the_event() {
        let db = MemoryLedger::default();
        let booking = seed_booking(&db, "booking-1", BookingStatus::PendingPayment).await;
        let processor = processor(db.clone());
        let mut event = sample_payment("booking-1", 0);
        if let ChainEvent::PaymentConfirmed { platform_fee_rate, .. } = &mut event.event {
            *platform_fee_rate = U256::from(u64::MAX) + U256::from(5u64);
        }
        let err = processor.process_event(&event).await.unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidFeeRate(_)));
        assert!(!err.is_transient());
        let record = db.fetch_event(&event.dedup_key()).await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        let stored = db.fetch_booking(&booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::PendingPayment);
        assert!(stored.platform_fee_rate.is_none());
    }

    #[test]
    fn fee_rates_up_to_the_full_scale_are_accepted() {
        assert_eq!(rate_bps(U256::zero()).unwrap(), 0);
        assert_eq!(rate_bps(U256::from(10_000u64)).unwrap(), 10_000);
        assert!(matches!(rate_bps(U256::from(10_001u64)), Err(ProcessingError::InvalidFeeRate(_))));
    }

    #[tokio::test]
    async fn a_stale_read_does_not_regress_a_booking() {
        let db = MemoryLedger::default();
        let stale = seed_booking(&db, "booking-1", BookingStatus::Paid).await;
        db.update_booking(&stale.id, BookingUpdate::default().with_status(BookingStatus::Completed)).await.unwrap();
        let processor = processor(db.clone());
        let update = BookingUpdate::default().with_status(BookingStatus::Cancelled);
        let outcome = processor.update_unless_stale(&stale, &CANCELLABLE, update).await.unwrap();
        assert!(matches!(outcome, GuardedUpdate::Stale(BookingStatus::Completed)));
        let stored = db.fetch_booking(&stale.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Completed);
    }
}
