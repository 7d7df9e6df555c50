use serde::Serialize;

use crate::{
    chain::ChainEventEnvelope,
    db_types::{Booking, BookingId, BookingStatus},
};

/// A booking moved to a new status. Sent to everyone with an interest in the booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingStateChanged {
    pub booking: Booking,
    pub old_status: BookingStatus,
    pub new_status: BookingStatus,
    pub recipients: Vec<String>,
}

impl BookingStateChanged {
    pub fn new(booking: Booking, old_status: BookingStatus) -> Self {
        let new_status = booking.status;
        let recipients = booking.participant_ids();
        Self { booking, old_status, new_status, recipients }
    }
}

/// A contract event affecting a booking was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainEventObserved {
    pub envelope: ChainEventEnvelope,
    pub booking_id: BookingId,
    pub recipients: Vec<String>,
}

/// The meeting room for a cancelled booking should be released. Best effort only: nothing waits on the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeetingReleaseRequested {
    pub booking_id: BookingId,
    pub meeting_link: String,
}
