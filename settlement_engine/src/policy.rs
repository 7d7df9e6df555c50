//! # Cancellation policy evaluation
//!
//! Pure functions that decide which cancellation policies apply to a booking, and what a chosen policy pays out.
//! Fetching the booking and the policies is the job of [`crate::CancellationPolicyApi`].
//!
//! A policy applies when every one of its conditions holds, and the requester's role is allowed to invoke it:
//!
//! * `customer_no_show` can only be claimed by the provider.
//! * Any other `customer_*` policy can only be invoked by the customer.
//! * `provider_cancel` can only be invoked by the provider.
//! * Everything else is open to both parties.
use std::fmt::Display;

use bsg_common::Money;
use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::db_types::{Booking, BookingStatus, CancellationPolicy, PolicyCondition};

pub const CUSTOMER_NO_SHOW: &str = "customer_no_show";
pub const PROVIDER_CANCEL: &str = "provider_cancel";
const CUSTOMER_PREFIX: &str = "customer_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterRole {
    Customer,
    Provider,
}

impl Display for RequesterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

/// Works out which side of the booking `user_id` is on. Returns `None` for anyone else.
pub fn resolve_role(booking: &Booking, user_id: &str) -> Option<RequesterRole> {
    if booking.customer_id == user_id {
        Some(RequesterRole::Customer)
    } else if booking.provider_id == user_id {
        Some(RequesterRole::Provider)
    } else {
        None
    }
}

/// Whole minutes from `now` until `scheduled_at`, rounded down. Negative once the start time has passed.
pub fn minutes_until_start(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (scheduled_at - now).num_milliseconds().div_euclid(60_000)
}

pub fn role_may_invoke(policy_key: &str, role: RequesterRole) -> bool {
    match policy_key {
        CUSTOMER_NO_SHOW => role == RequesterRole::Provider,
        PROVIDER_CANCEL => role == RequesterRole::Provider,
        k if k.starts_with(CUSTOMER_PREFIX) => role == RequesterRole::Customer,
        _ => true,
    }
}

pub fn condition_holds(condition: &PolicyCondition, status: BookingStatus, minutes: i64) -> bool {
    match condition {
        PolicyCondition::BookingStatus(required) => *required == status,
        PolicyCondition::MinTimeBeforeStart(threshold) => *threshold <= minutes,
        PolicyCondition::MaxTimeBeforeStart(threshold) => *threshold > minutes,
        PolicyCondition::TimeBeforeStart(exact) => *exact == minutes,
        PolicyCondition::Unrecognized { kind, value } => {
            warn!("📜️ Condition '{kind}'='{value}' is not understood. The policy it belongs to will not apply.");
            false
        },
    }
}

pub fn policy_applies(policy: &CancellationPolicy, status: BookingStatus, minutes: i64, role: RequesterRole) -> bool {
    policy.active &&
        role_may_invoke(&policy.key, role) &&
        policy.conditions.iter().all(|c| condition_holds(c, status, minutes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicablePolicy {
    #[serde(flatten)]
    pub policy: CancellationPolicy,
    pub minutes_until_start: i64,
    pub requester_role: RequesterRole,
}

/// Filters `policies` down to those that apply, preserving their order. No ranking is applied.
pub fn applicable_policies(
    policies: Vec<CancellationPolicy>,
    status: BookingStatus,
    minutes: i64,
    role: RequesterRole,
) -> Vec<ApplicablePolicy> {
    policies
        .into_iter()
        .filter(|p| policy_applies(p, status, minutes, role))
        .map(|policy| ApplicablePolicy { policy, minutes_until_start: minutes, requester_role: role })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundBreakdown {
    pub customer_refund: Money,
    pub provider_earnings: Money,
    pub platform_fee: Money,
}

impl RefundBreakdown {
    /// Each share is `round2(total × pct / 100)`. The percentages were validated when the policy was configured and
    /// are not re-checked here.
    pub fn for_policy(policy: &CancellationPolicy, total: Money) -> Self {
        Self {
            customer_refund: total.percent(policy.customer_refund_pct),
            provider_earnings: total.percent(policy.provider_earnings_pct),
            platform_fee: total.percent(policy.platform_fee_pct),
        }
    }
}
