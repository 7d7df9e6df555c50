use bsg_common::{Money, Percentage};
use chrono::{DateTime, TimeZone, Utc};
use ethers::{
    types::{Address, H256, U256},
    utils::keccak256,
};

use crate::{
    chain::{ChainEvent, ChainEventEnvelope},
    db_types::{
        Booking,
        BookingId,
        BookingStatus,
        BookingUpdate,
        CancellationPolicy,
        ChainBookingId,
        NewBooking,
        NewCancellationPolicy,
        PolicyCondition,
        WalletAddress,
    },
    traits::LedgerStore,
};

pub const SAMPLE_BLOCK: u64 = 100;

pub fn sample_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("valid timestamp")
}

pub fn customer_wallet() -> Address {
    Address::repeat_byte(1)
}

pub fn provider_wallet() -> Address {
    Address::repeat_byte(2)
}

/// A transaction hash that is unique per booking and event type.
pub fn sample_tx_hash(booking_id: &str, event: &str) -> H256 {
    H256::from(keccak256(format!("{booking_id}:{event}").as_bytes()))
}

fn envelope(event: ChainEvent, booking_id: &str, log_index: u64) -> ChainEventEnvelope {
    let tx = sample_tx_hash(booking_id, &event.kind().to_string());
    ChainEventEnvelope::new(event, sample_time()).with_position(tx, log_index, SAMPLE_BLOCK)
}

fn chain_id(booking_id: &str) -> ChainBookingId {
    ChainBookingId::derive(&BookingId::new(booking_id))
}

/// A 100.00 payment (6 decimals) at the no-referrer fee rates.
pub fn sample_payment(booking_id: &str, log_index: u64) -> ChainEventEnvelope {
    let event = ChainEvent::PaymentConfirmed {
        booking_id: chain_id(booking_id),
        customer: customer_wallet(),
        provider: provider_wallet(),
        referrer: Address::zero(),
        amount: U256::from(100_000_000u64),
        platform_fee_rate: U256::from(1000u64),
        referrer_fee_rate: U256::zero(),
    };
    envelope(event, booking_id, log_index)
}

/// Completion of a 100.00 booking: 90.00 to the provider, 10.00 to the platform.
pub fn sample_completion(booking_id: &str, log_index: u64) -> ChainEventEnvelope {
    let event = ChainEvent::ServiceCompleted {
        booking_id: chain_id(booking_id),
        provider: provider_wallet(),
        provider_amount: U256::from(90_000_000u64),
        platform_fee: U256::from(10_000_000u64),
        referrer_fee: U256::zero(),
    };
    envelope(event, booking_id, log_index)
}

/// A full refund, initiated by the customer.
pub fn sample_cancellation(booking_id: &str, log_index: u64) -> ChainEventEnvelope {
    let event = ChainEvent::BookingCancelled {
        booking_id: chain_id(booking_id),
        initiator: customer_wallet(),
        customer_amount: U256::from(100_000_000u64),
        provider_amount: U256::zero(),
        platform_amount: U256::zero(),
        referrer_amount: U256::zero(),
        reason: "customer_cancel_24h".into(),
    };
    envelope(event, booking_id, log_index)
}

/// Inserts a 100.00 booking between `customer-1` and `provider-1` and moves it straight to `status`.
pub async fn seed_booking<B: LedgerStore>(db: &B, booking_id: &str, status: BookingStatus) -> Booking {
    let booking = NewBooking::new(
        BookingId::new(booking_id),
        "customer-1",
        "provider-1",
        sample_time() + chrono::Duration::days(1),
        Money::from_units(100),
    )
    .with_customer_wallet(WalletAddress::from(customer_wallet()))
    .with_provider_wallet(WalletAddress::from(provider_wallet()))
    .with_meeting_link("https://meet.example.com/abc");
    let booking = db.insert_booking(booking).await.expect("Error seeding booking");
    if status == BookingStatus::Pending {
        return booking;
    }
    let update = BookingUpdate::default().with_status(status);
    db.update_booking(&booking.id, update).await.expect("Error setting booking status")
}

fn default_policy(
    key: &str,
    name: &str,
    pcts: (u8, u8, u8),
    extra: Option<PolicyCondition>,
) -> NewCancellationPolicy {
    let pct = |v: u8| Percentage::from_int(v).expect("valid percentage");
    let mut conditions = vec![PolicyCondition::BookingStatus(BookingStatus::Paid)];
    conditions.extend(extra);
    NewCancellationPolicy {
        key: key.into(),
        name: name.into(),
        description: String::new(),
        active: true,
        conditions,
        customer_refund_pct: pct(pcts.0),
        provider_earnings_pct: pct(pcts.1),
        platform_fee_pct: pct(pcts.2),
    }
}

/// The policies a fresh SQLite database is seeded with, in the same order.
pub fn default_policies() -> Vec<NewCancellationPolicy> {
    vec![
        default_policy(
            "customer_cancel_24h",
            "Customer cancels 24h ahead",
            (100, 0, 0),
            Some(PolicyCondition::MinTimeBeforeStart(1440)),
        ),
        default_policy(
            "customer_cancel_late",
            "Customer cancels late",
            (50, 45, 5),
            Some(PolicyCondition::MaxTimeBeforeStart(1440)),
        ),
        default_policy(
            "customer_no_show",
            "Customer did not show up",
            (0, 90, 10),
            Some(PolicyCondition::MaxTimeBeforeStart(0)),
        ),
        default_policy("provider_cancel", "Provider cancels", (100, 0, 0), None),
    ]
}

pub async fn seed_default_policies<B: LedgerStore>(db: &B) -> Vec<CancellationPolicy> {
    let mut result = Vec::new();
    for policy in default_policies() {
        result.push(db.insert_policy(policy).await.expect("Error seeding policy"));
    }
    result
}
