use std::{sync::Arc, time::Duration};

use bsg_common::Money;
use settlement_engine::{
    db_types::{AuthorizationKind, BookingId, BookingStatus, BookingUpdate, EventStatus, Nonce, NonceRecord},
    events::EventProducers,
    pipeline::{EventProcessor, MonitorStatus, ProcessingOutcome, QueueWorker, WorkerConfig},
    test_utils::{
        prepare_env::{drop_database, prepare_test_env, random_db_path},
        sample_cancellation,
        sample_completion,
        sample_payment,
        seed_booking,
    },
    traits::{LedgerStore, LedgerStoreError, QueueBackend},
    EventQueue,
    SqliteDatabase,
};

async fn setup() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

async fn tear_down(db: SqliteDatabase) {
    let url = db.url().to_string();
    db.close().await;
    drop_database(&url).await;
}

fn processor(db: &SqliteDatabase) -> EventProcessor<SqliteDatabase> {
    EventProcessor::new(db.clone(), EventProducers::default(), 6, Arc::new(MonitorStatus::default()))
}

#[tokio::test]
async fn default_policies_are_seeded() {
    let db = setup().await;
    let policies = db.fetch_active_policies().await.expect("Error fetching policies");
    let keys = policies.iter().map(|p| p.key.as_str()).collect::<Vec<_>>();
    assert_eq!(keys, vec!["customer_cancel_24h", "customer_cancel_late", "customer_no_show", "provider_cancel"]);
    for p in &policies {
        let sum = p.customer_refund_pct.value() + p.provider_earnings_pct.value() + p.platform_fee_pct.value();
        assert_eq!(sum, 100.into(), "{} does not sum to 100", p.key);
        assert!(!p.conditions.is_empty());
    }
    tear_down(db).await;
}

#[tokio::test]
async fn nonces_are_single_use() {
    let db = setup().await;
    let booking = seed_booking(&db, "b1", BookingStatus::PendingPayment).await;
    let nonce = Nonce(1_717_243_200_000_123_456u64.into());
    let record = NonceRecord::new(nonce, booking.id.clone(), AuthorizationKind::BookingPayment);
    db.insert_nonce(record.clone()).await.expect("First insert should succeed");
    let err = db.insert_nonce(record).await.unwrap_err();
    assert!(matches!(err, LedgerStoreError::NonceAlreadyUsed(n) if n == nonce));
    let stored = db.fetch_nonce(&nonce).await.unwrap().expect("Nonce should be stored");
    assert_eq!(stored.booking_id, booking.id);
    assert_eq!(stored.kind, AuthorizationKind::BookingPayment);
    tear_down(db).await;
}

#[tokio::test]
async fn duplicate_bookings_are_refused() {
    let db = setup().await;
    seed_booking(&db, "b1", BookingStatus::Pending).await;
    let booking = settlement_engine::db_types::NewBooking::new(
        BookingId::new("b1"),
        "customer-2",
        "provider-2",
        chrono::Utc::now(),
        Money::from_units(10),
    );
    let err = db.insert_booking(booking).await.unwrap_err();
    assert!(matches!(err, LedgerStoreError::BookingAlreadyExists(_)));
    tear_down(db).await;
}

#[tokio::test]
async fn replaying_events_is_idempotent() {
    let db = setup().await;
    let booking = seed_booking(&db, "b1", BookingStatus::PendingPayment).await;
    let payment = sample_payment("b1", 0);
    let completion = sample_completion("b1", 1);

    let first = processor(&db);
    assert_eq!(first.process_event(&payment).await.unwrap(), ProcessingOutcome::Applied);
    assert_eq!(first.process_event(&completion).await.unwrap(), ProcessingOutcome::Applied);
    let after_first = db.fetch_booking(&booking.id).await.unwrap().unwrap();

    // A restarted processor has an empty cache and must rely on the event records
    let second = processor(&db);
    assert_eq!(second.process_event(&payment).await.unwrap(), ProcessingOutcome::Duplicate);
    assert_eq!(second.process_event(&completion).await.unwrap(), ProcessingOutcome::Duplicate);
    let after_second = db.fetch_booking(&booking.id).await.unwrap().unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.status, BookingStatus::Completed);
    assert_eq!(after_second.paid_amount, Some(Money::from_units(100)));
    assert_eq!(after_second.platform_fee_rate, Some(1000));
    let txs = db.fetch_transactions_for_provider("provider-1").await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].amount, Money::from_units(90));
    assert_eq!(db.fetch_provider_earnings("provider-1").await.unwrap(), Some(Money::from_units(90)));
    let record = db.fetch_event(&completion.dedup_key()).await.unwrap().unwrap();
    assert_eq!(record.status, EventStatus::Processed);
    tear_down(db).await;
}

#[tokio::test]
async fn unknown_bookings_are_recorded_as_failed() {
    let db = setup().await;
    let payment = sample_payment("ghost", 0);
    let err = processor(&db).process_event(&payment).await.unwrap_err();
    assert!(!err.is_transient());
    let record = db.fetch_event(&payment.dedup_key()).await.unwrap().expect("Failure should be recorded");
    assert_eq!(record.status, EventStatus::Failed);
    assert!(record.error.unwrap_or_default().contains("No booking exists"));
    tear_down(db).await;
}

#[tokio::test]
async fn queue_redelivers_unacknowledged_entries() {
    let db = setup().await;
    let queue = EventQueue::new(db.clone());
    let a = queue.push(&sample_payment("b1", 0)).await.unwrap();
    let b = queue.push(&sample_completion("b1", 1)).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 2);

    let batch = queue.claim_batch(5, Duration::from_secs(300)).await.unwrap();
    assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, b]);
    assert_eq!(batch[0].envelope, sample_payment("b1", 0));
    // Claimed entries are invisible while the lease holds
    assert!(queue.claim_batch(5, Duration::from_secs(300)).await.unwrap().is_empty());
    // ...and come back once it has lapsed
    queue.ack(a).await.unwrap();
    let batch = db.claim_batch(5, Duration::ZERO).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, b);
    queue.ack(b).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 0);
    tear_down(db).await;
}

#[tokio::test]
async fn queued_entries_are_visible_to_other_connections() {
    let db = setup().await;
    db.enqueue(&sample_payment("b1", 0)).await.unwrap();
    db.enqueue(&sample_completion("b1", 1)).await.unwrap();
    let other = SqliteDatabase::new_with_url(db.url(), 1).await.expect("Error opening second pool");
    assert_eq!(other.depth().await.unwrap(), 2);
    let batch = other.claim_batch(5, Duration::from_secs(300)).await.unwrap();
    assert_eq!(batch.len(), 2);
    other.close().await;
    tear_down(db).await;
}

#[tokio::test]
async fn conditional_updates_never_regress_a_booking() {
    let db = setup().await;
    let booking = seed_booking(&db, "b1", BookingStatus::Completed).await;
    let cancel = BookingUpdate::default().with_status(BookingStatus::Cancelled);
    let from = [BookingStatus::PendingPayment, BookingStatus::Paid];
    let skipped = db.update_booking_from(&booking.id, &from, cancel.clone()).await.unwrap();
    assert!(skipped.is_none());
    let stored = db.fetch_booking(&booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Completed);

    let from = [BookingStatus::Paid, BookingStatus::Completed];
    let applied = db.update_booking_from(&booking.id, &from, cancel.clone()).await.unwrap();
    assert_eq!(applied.map(|b| b.status), Some(BookingStatus::Cancelled));

    let err = db.update_booking_from(&BookingId::new("nobody"), &from, cancel).await.unwrap_err();
    assert!(matches!(err, LedgerStoreError::BookingNotFound(_)));
    tear_down(db).await;
}

#[tokio::test]
async fn worker_drains_the_durable_queue() {
    let db = setup().await;
    seed_booking(&db, "b1", BookingStatus::PendingPayment).await;
    seed_booking(&db, "b2", BookingStatus::Paid).await;
    let queue = EventQueue::new(db.clone());
    for envelope in [sample_payment("b1", 0), sample_cancellation("b2", 0), sample_completion("b1", 1)] {
        queue.push(&envelope).await.unwrap();
    }
    let processor = Arc::new(processor(&db));
    let config = WorkerConfig { batch_size: 2, ..Default::default() };
    let worker = QueueWorker::new(queue.clone(), Arc::clone(&processor), config);
    assert_eq!(worker.drain().await, 3);
    assert_eq!(queue.depth().await.unwrap(), 0);

    let b1 = db.fetch_booking(&BookingId::new("b1")).await.unwrap().unwrap();
    assert_eq!(b1.status, BookingStatus::Completed);
    let b2 = db.fetch_booking(&BookingId::new("b2")).await.unwrap().unwrap();
    assert_eq!(b2.status, BookingStatus::Cancelled);
    assert_eq!(b2.cancellation_reason.as_deref(), Some("customer_cancel_24h"));
    let snapshot = processor.status().snapshot(None);
    assert_eq!(snapshot.events_processed, 3);
    tear_down(db).await;
}
