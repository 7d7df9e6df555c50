use std::fmt::Debug;

use bsg_common::Money;
use log::*;
use serde::Serialize;

use crate::{
    db_types::{Booking, BookingId, CancellationPolicy, NewCancellationPolicy},
    helpers::SharedClock,
    policy::{applicable_policies, minutes_until_start, resolve_role, ApplicablePolicy, RefundBreakdown},
    settlement_api::errors::PolicyError,
    traits::{LedgerStore, LedgerStoreError},
};

/// A policy that applies, along with what it would pay out on this booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyQuote {
    #[serde(flatten)]
    pub applicable: ApplicablePolicy,
    pub refund: RefundBreakdown,
}

/// Answers "which cancellation options does this user have right now?" for a booking.
pub struct CancellationPolicyApi<B> {
    db: B,
    clock: SharedClock,
}

impl<B> Debug for CancellationPolicyApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CancellationPolicyApi")
    }
}

impl<B> CancellationPolicyApi<B> {
    pub fn new(db: B, clock: SharedClock) -> Self {
        Self { db, clock }
    }
}

impl<B> CancellationPolicyApi<B>
where B: LedgerStore
{
    /// All the policies `user_id` could invoke on this booking at this moment. No ranking is applied; the order is
    /// the order the store returns them in.
    pub async fn applicable_policies(
        &self,
        booking_id: &BookingId,
        user_id: &str,
    ) -> Result<Vec<ApplicablePolicy>, PolicyError> {
        let (_, policies) = self.evaluate(booking_id, user_id).await?;
        Ok(policies)
    }

    /// As [`Self::applicable_policies`], with each policy's refund breakdown worked out against the amount held in
    /// escrow.
    pub async fn quote(&self, booking_id: &BookingId, user_id: &str) -> Result<Vec<PolicyQuote>, PolicyError> {
        let (booking, policies) = self.evaluate(booking_id, user_id).await?;
        let total = escrowed_amount(&booking);
        let quotes = policies
            .into_iter()
            .map(|applicable| {
                let refund = RefundBreakdown::for_policy(&applicable.policy, total);
                PolicyQuote { applicable, refund }
            })
            .collect();
        Ok(quotes)
    }

    /// Evaluates the policies and returns the booking they were evaluated against.
    pub(crate) async fn evaluate(
        &self,
        booking_id: &BookingId,
        user_id: &str,
    ) -> Result<(Booking, Vec<ApplicablePolicy>), PolicyError> {
        let booking =
            self.db.fetch_booking(booking_id).await?.ok_or_else(|| PolicyError::BookingNotFound(booking_id.clone()))?;
        let role = resolve_role(&booking, user_id).ok_or_else(|| PolicyError::Unauthorized {
            user_id: user_id.to_string(),
            booking_id: booking_id.clone(),
        })?;
        let minutes = minutes_until_start(booking.scheduled_at, self.clock.now());
        let policies = self.db.fetch_active_policies().await?;
        let candidates = policies.len();
        let applicable = applicable_policies(policies, booking.status, minutes, role);
        debug!(
            "📜️ {} of {candidates} policies apply to booking {booking_id} for {role} {user_id} ({minutes} min to start)",
            applicable.len()
        );
        Ok((booking, applicable))
    }

    pub fn refund_breakdown(&self, policy: &CancellationPolicy, booking: &Booking) -> RefundBreakdown {
        RefundBreakdown::for_policy(policy, escrowed_amount(booking))
    }

    /// Stores a new policy. The three percentages must sum to exactly 100.
    pub async fn configure_policy(&self, policy: NewCancellationPolicy) -> Result<CancellationPolicy, PolicyError> {
        let policy = self.db.insert_policy(policy).await.map_err(|e| {
            if let LedgerStoreError::InvalidPolicy(msg) = &e {
                warn!("📜️ Policy rejected. {msg}");
            }
            PolicyError::from(e)
        })?;
        info!("📜️ Cancellation policy {} ({}) configured", policy.key, policy.id);
        Ok(policy)
    }
}

/// The amount the escrow contract holds for the booking. Before the payment event arrives, that is the booking
/// total.
pub(crate) fn escrowed_amount(booking: &Booking) -> Money {
    booking.paid_amount.unwrap_or(booking.total_amount)
}
