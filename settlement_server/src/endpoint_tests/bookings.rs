use std::str::FromStr;

use actix_web::{http::StatusCode, web, web::ServiceConfig};
use bsg_common::{Money, Secret};
use serde_json::{json as json_body, Value};
use settlement_engine::{
    db_types::{BookingStatus, NonceRecord},
    helpers::FixedClock,
    signer::{AuthorizationSigner, SignerConfig},
    test_utils::{sample_time, seed_booking, seed_default_policies, MemoryLedger},
    traits::{LedgerStore, LedgerStoreError},
    AuthorizationApi,
    CancellationPolicyApi,
};

use super::helpers::{get_request, json, post_request, DEV_KEY};
use crate::{
    endpoint_tests::mocks::MockLedger,
    routes::{CancellationAuthorizationRoute, CancellationPoliciesRoute, PaymentAuthorizationRoute},
};

const POLICIES_PATH: &str = "/bookings/b1/cancellation_policies";
const PAYMENT_PATH: &str = "/bookings/b1/payment_authorization";
const CANCELLATION_PATH: &str = "/bookings/b1/cancellation_authorization";

fn money(v: &Value) -> Money {
    let s = v.as_str().unwrap_or_else(|| panic!("{v} is not a money string"));
    Money::from_str(s).unwrap()
}

fn configure_policies<B: LedgerStore + 'static>(db: B) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let api = CancellationPolicyApi::new(db, FixedClock::new(sample_time()).shared());
        cfg.app_data(web::Data::new(api)).service(CancellationPoliciesRoute::<B>::new());
    }
}

fn configure_authorizations<B: LedgerStore + 'static>(db: B, key: Option<&str>) -> impl FnOnce(&mut ServiceConfig) {
    let clock = FixedClock::new(sample_time());
    let key = key.map(|k| Secret::new(k.to_string()));
    let signer = AuthorizationSigner::new(SignerConfig::default(), key.as_ref(), clock.shared()).unwrap();
    move |cfg| {
        let api = AuthorizationApi::new(db, signer, clock.shared());
        cfg.app_data(web::Data::new(api))
            .service(PaymentAuthorizationRoute::<B>::new())
            .service(CancellationAuthorizationRoute::<B>::new());
    }
}

async fn ledger_with_booking(status: BookingStatus) -> MemoryLedger {
    let db = MemoryLedger::default();
    seed_default_policies(&db).await;
    seed_booking(&db, "b1", status).await;
    db
}

async fn policy_id(db: &MemoryLedger, key: &str) -> i64 {
    let policies = db.fetch_active_policies().await.unwrap();
    policies.iter().find(|p| p.key == key).map(|p| p.id).unwrap_or_else(|| panic!("No policy {key}"))
}

//----------------------------------------------   Cancellation policies  -------------------------------------------

#[actix_web::test]
async fn policies_require_an_authenticated_user() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let (status, body) = get_request("", POLICIES_PATH, configure_policies(db)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["error"], "No authenticated user was supplied with the request.");
}

#[actix_web::test]
async fn customer_sees_their_policies() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let (status, body) = get_request("customer-1", POLICIES_PATH, configure_policies(db)).await;
    assert_eq!(status, StatusCode::OK);
    let quotes = json(&body);
    let quotes = quotes.as_array().expect("Expected a list of quotes");
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0]["key"], "customer_cancel_24h");
    assert_eq!(quotes[0]["minutes_until_start"], 1440);
    assert_eq!(quotes[0]["requester_role"], "customer");
    assert_eq!(money(&quotes[0]["refund"]["customer_refund"]), Money::from_units(100));
    assert_eq!(money(&quotes[0]["refund"]["provider_earnings"]), Money::ZERO);
}

#[actix_web::test]
async fn provider_sees_provider_policies() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let (status, body) = get_request("provider-1", POLICIES_PATH, configure_policies(db)).await;
    assert_eq!(status, StatusCode::OK);
    let keys = json(&body)
        .as_array()
        .expect("Expected a list of quotes")
        .iter()
        .map(|q| q["key"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["provider_cancel".to_string()]);
}

#[actix_web::test]
async fn strangers_cannot_see_policies() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let (status, body) = get_request("mallory", POLICIES_PATH, configure_policies(db)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(json(&body)["error"].as_str().unwrap().starts_with("Insufficient Permissions."));
}

#[actix_web::test]
async fn unknown_bookings_are_not_found() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let (status, _) =
        get_request("customer-1", "/bookings/ghost/cancellation_policies", configure_policies(db)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn store_failures_are_server_errors() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedger::new();
    ledger.expect_fetch_booking().returning(|_| Err(LedgerStoreError::DatabaseError("connection reset".into())));
    let (status, body) = get_request("customer-1", POLICIES_PATH, configure_policies(ledger)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json(&body)["error"].as_str().unwrap().contains("connection reset"));
}

//----------------------------------------------   Payment authorization  -------------------------------------------

#[actix_web::test]
async fn customer_gets_a_payment_authorization() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::PendingPayment).await;
    let (status, body) =
        post_request("customer-1", PAYMENT_PATH, None, configure_authorizations(db.clone(), Some(DEV_KEY))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let result = json(&body);
    let signature = result["authorization"]["signature"].as_str().unwrap();
    assert!(signature.starts_with("0x"));
    assert_eq!(signature.len(), 2 + 130);
    assert_eq!(money(&result["fees"]["platform_fee"]), Money::from_units(10));
    assert_eq!(money(&result["fees"]["referrer_fee"]), Money::ZERO);
    assert_eq!(money(&result["fees"]["counterparty_amount"]), Money::from_units(90));
    assert!(result["authorization"]["message"]["bookingId"].is_string());
}

#[actix_web::test]
async fn only_the_customer_may_pay() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::PendingPayment).await;
    let (status, _) = post_request("provider-1", PAYMENT_PATH, None, configure_authorizations(db, Some(DEV_KEY))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn payment_requires_an_accepted_booking() {
    let _ = env_logger::try_init().ok();
    for booking_status in [BookingStatus::Pending, BookingStatus::Paid] {
        let db = ledger_with_booking(booking_status).await;
        let (status, body) =
            post_request("customer-1", PAYMENT_PATH, None, configure_authorizations(db, Some(DEV_KEY))).await;
        assert_eq!(status, StatusCode::CONFLICT, "{booking_status}: {body}");
    }
}

#[actix_web::test]
async fn no_signing_key_means_no_authorizations() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::PendingPayment).await;
    let (status, body) = post_request("customer-1", PAYMENT_PATH, None, configure_authorizations(db, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json(&body)["error"].as_str().unwrap().contains("No signing key"));
}

#[actix_web::test]
async fn nonce_collisions_are_conflicts() {
    let _ = env_logger::try_init().ok();
    let booking = seed_booking(&MemoryLedger::default(), "b1", BookingStatus::PendingPayment).await;
    let mut ledger = MockLedger::new();
    ledger.expect_clone().returning(MockLedger::new);
    ledger.expect_fetch_booking().returning(move |_| Ok(Some(booking.clone())));
    ledger.expect_insert_nonce().times(1).returning(|r: NonceRecord| Err(LedgerStoreError::NonceAlreadyUsed(r.nonce)));
    let (status, _) =
        post_request("customer-1", PAYMENT_PATH, None, configure_authorizations(ledger, Some(DEV_KEY))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

//----------------------------------------------   Cancellation authorization  --------------------------------------

#[actix_web::test]
async fn customer_gets_a_cancellation_authorization() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let id = policy_id(&db, "customer_cancel_24h").await;
    let body = json_body!({ "policy_id": id, "reason": "" });
    let (status, body) =
        post_request("customer-1", CANCELLATION_PATH, Some(body), configure_authorizations(db, Some(DEV_KEY))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let result = json(&body);
    assert_eq!(result["policy_key"], "customer_cancel_24h");
    assert_eq!(result["authorization"]["message"]["reason"], "customer_cancel_24h");
    assert_eq!(money(&result["split"]["customer_amount"]), Money::from_units(100));
    assert_eq!(money(&result["split"]["provider_amount"]), Money::ZERO);
    assert_eq!(money(&result["split"]["platform_amount"]), Money::ZERO);
}

#[actix_web::test]
async fn inapplicable_policies_are_refused() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let id = policy_id(&db, "customer_no_show").await;
    let body = json_body!({ "policy_id": id, "reason": "I overslept" });
    let (status, body) =
        post_request("customer-1", CANCELLATION_PATH, Some(body), configure_authorizations(db, Some(DEV_KEY))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json(&body)["error"].as_str().unwrap().contains(&id.to_string()));
}

#[actix_web::test]
async fn malformed_cancellation_requests_are_rejected() {
    let _ = env_logger::try_init().ok();
    let db = ledger_with_booking(BookingStatus::Paid).await;
    let body = json_body!({ "reason": "no policy given" });
    let (status, _) =
        post_request("customer-1", CANCELLATION_PATH, Some(body), configure_authorizations(db, Some(DEV_KEY))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
