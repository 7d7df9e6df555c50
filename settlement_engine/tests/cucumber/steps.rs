use std::str::FromStr;

use bsg_common::{Money, Percentage};
use chrono::Duration;
use cucumber::{given, then, when};
use settlement_engine::{
    db_types::{BookingId, BookingStatus, BookingUpdate, NewBooking, NewCancellationPolicy, PolicyCondition},
    helpers::Clock,
    traits::LedgerStore,
    PolicyError,
};

use crate::cucumber::PolicyWorld;

#[given(expr = "a {word} booking {word} for {int} between '{word}' and '{word}' starting in {int} minutes")]
async fn booking(
    world: &mut PolicyWorld,
    status: String,
    booking_id: String,
    amount: i64,
    customer: String,
    provider: String,
    minutes: i64,
) {
    let status = BookingStatus::from_str(&status).expect("Not a valid booking status");
    let system = world.system();
    let start = system.clock.now() + Duration::minutes(minutes);
    let booking = NewBooking::new(BookingId::new(booking_id), &customer, &provider, start, Money::from_units(amount));
    let booking = system.db.insert_booking(booking).await.expect("Error inserting booking");
    if status != BookingStatus::Pending {
        let update = BookingUpdate::default().with_status(status);
        system.db.update_booking(&booking.id, update).await.expect("Error updating booking status");
    }
}

#[given(expr = "a policy {word} for {word} bookings at least {int} minutes ahead paying {int}\\/{int}\\/{int}")]
async fn min_time_policy(
    world: &mut PolicyWorld,
    key: String,
    status: String,
    minutes: i64,
    customer: u8,
    provider: u8,
    platform: u8,
) {
    let status = BookingStatus::from_str(&status).expect("Not a valid booking status");
    let conditions = vec![PolicyCondition::BookingStatus(status), PolicyCondition::MinTimeBeforeStart(minutes)];
    let policy = new_policy(key, conditions, customer, provider, platform);
    world.api().configure_policy(policy).await.expect("Error configuring policy");
}

#[when(expr = "I configure a policy {word} paying {int}\\/{int}\\/{int}")]
async fn configure_policy(world: &mut PolicyWorld, key: String, customer: u8, provider: u8, platform: u8) {
    let policy = new_policy(key, vec![], customer, provider, platform);
    let result = world.api().configure_policy(policy).await.map(|_| Vec::new());
    world.last_result = Some(result);
}

fn new_policy(
    key: String,
    conditions: Vec<PolicyCondition>,
    customer: u8,
    provider: u8,
    platform: u8,
) -> NewCancellationPolicy {
    let pct = |v: u8| Percentage::from_int(v).expect("Not a valid percentage");
    NewCancellationPolicy {
        name: key.clone(),
        key,
        description: String::new(),
        active: true,
        conditions,
        customer_refund_pct: pct(customer),
        provider_earnings_pct: pct(provider),
        platform_fee_pct: pct(platform),
    }
}

#[when(expr = "{int} minutes pass")]
async fn time_passes(world: &mut PolicyWorld, minutes: i64) {
    world.system().clock.advance(Duration::minutes(minutes));
}

#[when(expr = "'{word}' asks which cancellation policies apply to booking {word}")]
async fn ask_for_policies(world: &mut PolicyWorld, user: String, booking_id: String) {
    let id = BookingId::new(booking_id);
    let result = world.api().applicable_policies(&id, &user).await;
    world.last_result = Some(result);
}

#[when(expr = "'{word}' asks for a cancellation quote on booking {word}")]
async fn ask_for_quote(world: &mut PolicyWorld, user: String, booking_id: String) {
    let id = BookingId::new(booking_id);
    world.last_quotes = world.api().quote(&id, &user).await.expect("Error fetching quote");
}

#[then(expr = "the applicable policies are {string}")]
async fn check_applicable(world: &mut PolicyWorld, expected: String) {
    let expected = expected.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect::<Vec<_>>();
    assert_eq!(world.applicable_keys(), expected);
}

#[then("no policies apply")]
async fn check_none_apply(world: &mut PolicyWorld) {
    assert!(world.applicable_keys().is_empty(), "Expected no policies, got {:?}", world.applicable_keys());
}

#[then(expr = "every applicable policy reports {int} minutes to start for a {word}")]
async fn check_annotations(world: &mut PolicyWorld, minutes: i64, role: String) {
    let Some(Ok(policies)) = &world.last_result else { panic!("Expected a successful policy request") };
    assert!(!policies.is_empty());
    for p in policies {
        assert_eq!(p.minutes_until_start, minutes);
        assert_eq!(p.requester_role.to_string(), role);
    }
}

#[then("the request is refused as unauthorized")]
async fn check_unauthorized(world: &mut PolicyWorld) {
    assert!(
        matches!(world.last_result, Some(Err(PolicyError::Unauthorized { .. }))),
        "Expected an authorization failure, got {:?}",
        world.last_result
    );
}

#[then("the policy is rejected")]
async fn check_rejected(world: &mut PolicyWorld) {
    assert!(matches!(world.last_result, Some(Err(PolicyError::Store(_)))), "Got {:?}", world.last_result);
}

#[then("the policy is accepted")]
async fn check_accepted(world: &mut PolicyWorld) {
    assert!(matches!(world.last_result, Some(Ok(_))), "Got {:?}", world.last_result);
}

#[then(expr = "policy {word} refunds {word} to the customer, {word} to the provider and {word} to the platform")]
async fn check_quote(world: &mut PolicyWorld, key: String, customer: String, provider: String, platform: String) {
    let quote = world
        .last_quotes
        .iter()
        .find(|q| q.applicable.policy.key == key)
        .unwrap_or_else(|| panic!("No quote for policy {key}"));
    let money = |s: &str| Money::from_str(s).expect("Not a valid amount");
    assert_eq!(quote.refund.customer_refund, money(&customer));
    assert_eq!(quote.refund.provider_earnings, money(&provider));
    assert_eq!(quote.refund.platform_fee, money(&platform));
}
