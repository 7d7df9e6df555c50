use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{Booking, BookingId, BookingStatus, BookingUpdate, NewBooking},
    events::{BookingStateChanged, EventProducers},
    helpers::SharedClock,
    policy::{resolve_role, RequesterRole},
    settlement_api::errors::BookingFlowError,
    traits::LedgerStore,
};

/// `BookingFlowApi` drives the off-chain half of the booking lifecycle.
///
/// | From \ To         | pending_payment | in_progress | rejected | cancelled |
/// |-------------------|-----------------|-------------|----------|-----------|
/// | `pending`         | provider        |             |          | either    |
/// | `pending_payment` |                 |             | provider | either    |
/// | `paid`            |                 | provider    | provider |           |
///
/// Moving a booking to `paid` or `completed` is never possible through this API. Those transitions are driven by
/// the escrow contract's events, via the event processor. Cancelling a paid booking likewise requires a signed
/// cancellation authorization and the resulting on-chain event.
pub struct BookingFlowApi<B> {
    db: B,
    producers: EventProducers,
    clock: SharedClock,
}

impl<B> Debug for BookingFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BookingFlowApi")
    }
}

impl<B> BookingFlowApi<B> {
    pub fn new(db: B, producers: EventProducers, clock: SharedClock) -> Self {
        Self { db, producers, clock }
    }
}

impl<B> BookingFlowApi<B>
where B: LedgerStore
{
    /// Stores a new booking in the `pending` state. Its on-chain identifier is derived at this point.
    pub async fn create_booking(&self, booking: NewBooking) -> Result<Booking, BookingFlowError> {
        let booking = self.db.insert_booking(booking).await?;
        info!(
            "📅️ Booking {} created for customer {} with provider {}",
            booking.id, booking.customer_id, booking.provider_id
        );
        Ok(booking)
    }

    pub async fn fetch_booking(&self, id: &BookingId) -> Result<Booking, BookingFlowError> {
        self.db.fetch_booking(id).await?.ok_or_else(|| BookingFlowError::BookingNotFound(id.clone()))
    }

    /// The provider accepts the booking request. The customer may now pay.
    pub async fn accept(&self, id: &BookingId, user_id: &str) -> Result<Booking, BookingFlowError> {
        let booking = self.fetch_for(id, user_id, &[RequesterRole::Provider], "accept").await?;
        let update = BookingUpdate::default().with_status(BookingStatus::PendingPayment);
        self.transition(booking, &[BookingStatus::Pending], update).await
    }

    /// The provider starts a paid session.
    pub async fn start_session(&self, id: &BookingId, user_id: &str) -> Result<Booking, BookingFlowError> {
        let booking = self.fetch_for(id, user_id, &[RequesterRole::Provider], "start").await?;
        let update = BookingUpdate::default().with_status(BookingStatus::InProgress);
        self.transition(booking, &[BookingStatus::Paid], update).await
    }

    pub async fn reject(&self, id: &BookingId, user_id: &str) -> Result<Booking, BookingFlowError> {
        let booking = self.fetch_for(id, user_id, &[RequesterRole::Provider], "reject").await?;
        let update = BookingUpdate::default().with_status(BookingStatus::Rejected);
        self.transition(booking, &[BookingStatus::PendingPayment, BookingStatus::Paid], update).await
    }

    /// Either party calls off a booking that has not been paid for. No funds are in escrow, so nothing needs
    /// authorizing.
    pub async fn cancel_before_payment(
        &self,
        id: &BookingId,
        user_id: &str,
        reason: Option<String>,
    ) -> Result<Booking, BookingFlowError> {
        let roles = [RequesterRole::Customer, RequesterRole::Provider];
        let booking = self.fetch_for(id, user_id, &roles, "cancel").await?;
        let update = BookingUpdate {
            status: Some(BookingStatus::Cancelled),
            cancellation_reason: reason,
            cancelled_by: Some(user_id.to_string()),
            cancelled_at: Some(self.clock.now()),
            ..Default::default()
        };
        self.transition(booking, &[BookingStatus::Pending, BookingStatus::PendingPayment], update).await
    }

    /// Generic status change, for callers that receive the target status as data. Delegates to the specific
    /// transitions above, and refuses the chain-driven ones.
    pub async fn change_status(
        &self,
        id: &BookingId,
        user_id: &str,
        to: BookingStatus,
    ) -> Result<Booking, BookingFlowError> {
        match to {
            BookingStatus::Paid | BookingStatus::Completed => {
                warn!("📅️ User {user_id} tried to move booking {id} to {to}. Refused.");
                Err(BookingFlowError::ChainDrivenTransition(to))
            },
            BookingStatus::PendingPayment => self.accept(id, user_id).await,
            BookingStatus::InProgress => self.start_session(id, user_id).await,
            BookingStatus::Rejected => self.reject(id, user_id).await,
            BookingStatus::Cancelled => self.cancel_before_payment(id, user_id, None).await,
            BookingStatus::Pending => {
                let booking = self.fetch_booking(id).await?;
                Err(BookingFlowError::InvalidTransition { from: booking.status, to })
            },
        }
    }

    async fn fetch_for(
        &self,
        id: &BookingId,
        user_id: &str,
        roles: &[RequesterRole],
        action: &'static str,
    ) -> Result<Booking, BookingFlowError> {
        let booking = self.fetch_booking(id).await?;
        match resolve_role(&booking, user_id) {
            Some(role) if roles.contains(&role) => Ok(booking),
            _ => Err(BookingFlowError::Unauthorized { user_id: user_id.to_string(), booking_id: id.clone(), action }),
        }
    }

    async fn transition(
        &self,
        booking: Booking,
        allowed_from: &[BookingStatus],
        update: BookingUpdate,
    ) -> Result<Booking, BookingFlowError> {
        let to = update.status.unwrap_or(booking.status);
        if !allowed_from.contains(&booking.status) {
            return Err(BookingFlowError::InvalidTransition { from: booking.status, to });
        }
        let old_status = booking.status;
        let Some(updated) = self.db.update_booking_from(&booking.id, allowed_from, update).await? else {
            // Another request moved the booking on since it was read
            let current = self.fetch_booking(&booking.id).await?;
            return Err(BookingFlowError::InvalidTransition { from: current.status, to });
        };
        info!("📅️ Booking {} moved from {old_status} to {}", updated.id, updated.status);
        self.producers.publish_booking_state_changed(BookingStateChanged::new(updated.clone(), old_status)).await;
        Ok(updated)
    }
}
