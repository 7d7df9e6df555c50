use std::fmt::Debug;

use bsg_common::{round2, Money};
use ethers::types::Address;
use log::*;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    db_types::{AuthorizationKind, Booking, BookingId, BookingStatus, NonceRecord, WalletAddress},
    fees::{FeeBreakdown, FeeRates},
    helpers::SharedClock,
    policy::RefundBreakdown,
    settlement_api::{
        cancellation_policy_api::{escrowed_amount, CancellationPolicyApi},
        errors::AuthorizationApiError,
    },
    signer::{
        AuthorizationSigner,
        BookingAuthorization,
        BookingPaymentTerms,
        CancellationAuthorization,
        CancellationTerms,
        SignedAuthorization,
    },
    traits::LedgerStore,
};

#[derive(Debug, Clone, Serialize)]
pub struct PaymentAuthorization {
    pub authorization: SignedAuthorization<BookingAuthorization>,
    pub fees: FeeBreakdown,
}

/// How the escrowed funds are divided when a booking is cancelled. The four parts sum to the escrowed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancellationSplit {
    pub customer_amount: Money,
    pub provider_amount: Money,
    pub platform_amount: Money,
    pub referrer_amount: Money,
}

impl CancellationSplit {
    /// Divides `total` according to a policy's refund breakdown.
    ///
    /// The policy's platform share is shared with the referrer in proportion to the booking's fee rates. The platform
    /// amount absorbs rounding. Should rounding leave nothing for the platform to absorb, the shortfall comes out of
    /// the customer refund.
    pub fn new(total: Money, refund: &RefundBreakdown, rates: FeeRates) -> Self {
        let referrer_amount = match rates.total_bps() {
            0 => Money::ZERO,
            total_bps => {
                let share = refund.platform_fee.value() * Decimal::from(rates.referrer_bps) / Decimal::from(total_bps);
                Money::new(round2(share))
            },
        };
        let mut customer_amount = refund.customer_refund;
        let provider_amount = refund.provider_earnings;
        let mut platform_amount = total - customer_amount - provider_amount - referrer_amount;
        if platform_amount < Money::ZERO {
            customer_amount += platform_amount;
            platform_amount = Money::ZERO;
        }
        Self { customer_amount, provider_amount, platform_amount, referrer_amount }
    }

    pub fn total(&self) -> Money {
        self.customer_amount + self.provider_amount + self.platform_amount + self.referrer_amount
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationAuthorizationResult {
    pub authorization: SignedAuthorization<CancellationAuthorization>,
    pub policy_key: String,
    pub split: CancellationSplit,
}

/// Issues the signed authorizations the escrow contract requires before it moves any funds.
///
/// Every authorization's nonce is persisted before the authorization is returned. If the nonce cannot be stored,
/// the authorization is discarded and an error is returned instead.
pub struct AuthorizationApi<B> {
    db: B,
    signer: AuthorizationSigner,
    policies: CancellationPolicyApi<B>,
}

impl<B> Debug for AuthorizationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthorizationApi({:?})", self.signer)
    }
}

impl<B: Clone> AuthorizationApi<B> {
    pub fn new(db: B, signer: AuthorizationSigner, clock: SharedClock) -> Self {
        let policies = CancellationPolicyApi::new(db.clone(), clock);
        Self { db, signer, policies }
    }
}

impl<B> AuthorizationApi<B>
where B: LedgerStore
{
    pub fn signer(&self) -> &AuthorizationSigner {
        &self.signer
    }

    /// Authorizes the customer to pay for a booking that the provider has accepted.
    pub async fn authorize_booking_payment(
        &self,
        booking_id: &BookingId,
        user_id: &str,
    ) -> Result<PaymentAuthorization, AuthorizationApiError> {
        let booking = self.fetch_booking(booking_id).await?;
        if booking.customer_id != user_id {
            return Err(AuthorizationApiError::Unauthorized {
                user_id: user_id.to_string(),
                booking_id: booking_id.clone(),
            });
        }
        if booking.status != BookingStatus::PendingPayment {
            return Err(AuthorizationApiError::InvalidStatus { booking_id: booking_id.clone(), status: booking.status });
        }
        let customer = require_wallet(&booking, booking.customer_wallet.as_ref(), "customer")?;
        let provider = require_wallet(&booking, booking.provider_wallet.as_ref(), "provider")?;
        let referrer = match booking.referrer_id {
            Some(_) => Some(require_wallet(&booking, booking.referrer_wallet.as_ref(), "referrer")?),
            None => booking.referrer_wallet.as_ref().map(|w| w.as_address()),
        };
        let fees = FeeBreakdown::calculate(booking.total_amount, referrer.is_some())?;
        let terms = BookingPaymentTerms {
            booking_id: booking.chain_booking_id,
            customer,
            provider,
            referrer,
            amount: fees.total_amount,
            rates: fees.rates(),
        };
        let authorization = self.signer.sign_booking_payment(&terms).await?;
        self.persist_nonce(&authorization, booking_id, AuthorizationKind::BookingPayment).await?;
        info!(
            "✍️ Payment authorization issued for booking {booking_id}. Amount {}, platform fee {}, referrer fee {}",
            fees.total_amount, fees.platform_fee, fees.referrer_fee
        );
        Ok(PaymentAuthorization { authorization, fees })
    }

    /// Authorizes a cancellation under `policy_id`, which must be one of the policies that currently apply to this
    /// booking and requester. An empty `reason` is replaced by the policy key.
    pub async fn authorize_cancellation(
        &self,
        booking_id: &BookingId,
        user_id: &str,
        policy_id: i64,
        reason: &str,
    ) -> Result<CancellationAuthorizationResult, AuthorizationApiError> {
        let (booking, applicable) = self.policies.evaluate(booking_id, user_id).await?;
        if booking.status.is_terminal() {
            return Err(AuthorizationApiError::InvalidStatus { booking_id: booking_id.clone(), status: booking.status });
        }
        let policy = applicable
            .into_iter()
            .find(|p| p.policy.id == policy_id)
            .map(|p| p.policy)
            .ok_or(AuthorizationApiError::PolicyNotApplicable(policy_id))?;
        let total = escrowed_amount(&booking);
        let refund = RefundBreakdown::for_policy(&policy, total);
        let split = CancellationSplit::new(total, &refund, booking_rates(&booking));
        let reason = match reason.trim() {
            "" => policy.key.clone(),
            r => r.to_string(),
        };
        let terms = CancellationTerms {
            booking_id: booking.chain_booking_id,
            customer_amount: split.customer_amount,
            provider_amount: split.provider_amount,
            platform_amount: split.platform_amount,
            referrer_amount: split.referrer_amount,
            reason,
        };
        let authorization = self.signer.sign_cancellation(&terms).await?;
        self.persist_nonce(&authorization, booking_id, AuthorizationKind::Cancellation).await?;
        info!(
            "✍️ Cancellation authorization issued for booking {booking_id} under policy {}. Customer {}, provider {}, \
             platform {}, referrer {}",
            policy.key, split.customer_amount, split.provider_amount, split.platform_amount, split.referrer_amount
        );
        Ok(CancellationAuthorizationResult { authorization, policy_key: policy.key, split })
    }

    async fn fetch_booking(&self, booking_id: &BookingId) -> Result<Booking, AuthorizationApiError> {
        self.db
            .fetch_booking(booking_id)
            .await?
            .ok_or_else(|| AuthorizationApiError::BookingNotFound(booking_id.clone()))
    }

    async fn persist_nonce<M>(
        &self,
        authorization: &SignedAuthorization<M>,
        booking_id: &BookingId,
        kind: AuthorizationKind,
    ) -> Result<(), AuthorizationApiError> {
        let record = NonceRecord::new(authorization.nonce, booking_id.clone(), kind);
        self.db.insert_nonce(record).await.map_err(|e| {
            let nonce = authorization.nonce;
            warn!("✍️ Could not record nonce {nonce} for booking {booking_id}. Authorization discarded. {e}");
            e
        })?;
        authorization.ensure_unexpired(self.signer.now())?;
        Ok(())
    }
}

fn require_wallet(
    booking: &Booking,
    wallet: Option<&WalletAddress>,
    party: &'static str,
) -> Result<Address, AuthorizationApiError> {
    wallet
        .map(|w| w.as_address())
        .ok_or_else(|| AuthorizationApiError::MissingWallet { booking_id: booking.id.clone(), party })
}

/// The rates the booking was paid at, falling back to the standard rates if the payment event has not been seen.
fn booking_rates(booking: &Booking) -> FeeRates {
    let defaults = FeeRates::for_booking(booking.has_referrer());
    match (booking.platform_fee_rate, booking.referrer_fee_rate) {
        (Some(platform), Some(referrer)) => FeeRates {
            platform_bps: u32::try_from(platform).unwrap_or(defaults.platform_bps),
            referrer_bps: u32::try_from(referrer).unwrap_or(defaults.referrer_bps),
        },
        _ => defaults,
    }
}
