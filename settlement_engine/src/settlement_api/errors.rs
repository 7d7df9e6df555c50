use thiserror::Error;

use crate::{
    db_types::{BookingId, BookingStatus},
    fees::FeeError,
    signer::SignerError,
    traits::LedgerStoreError,
};

#[derive(Debug, Clone, Error)]
pub enum BookingFlowError {
    #[error("Booking {0} does not exist")]
    BookingNotFound(BookingId),
    #[error("User {user_id} may not {action} booking {booking_id}")]
    Unauthorized { user_id: String, booking_id: BookingId, action: &'static str },
    #[error("Booking cannot move from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("Only confirmed on-chain events can move a booking to {0}")]
    ChainDrivenTransition(BookingStatus),
    #[error("{0}")]
    Store(#[from] LedgerStoreError),
}

#[derive(Debug, Clone, Error)]
pub enum PolicyError {
    #[error("Booking {0} does not exist")]
    BookingNotFound(BookingId),
    #[error("User {user_id} is not a party to booking {booking_id}")]
    Unauthorized { user_id: String, booking_id: BookingId },
    #[error("{0}")]
    Store(#[from] LedgerStoreError),
}

#[derive(Debug, Clone, Error)]
pub enum AuthorizationApiError {
    #[error("Booking {0} does not exist")]
    BookingNotFound(BookingId),
    #[error("User {user_id} may not request this authorization for booking {booking_id}")]
    Unauthorized { user_id: String, booking_id: BookingId },
    #[error("Booking {booking_id} is {status}, so this authorization cannot be issued")]
    InvalidStatus { booking_id: BookingId, status: BookingStatus },
    #[error("Booking {booking_id} has no {party} wallet address")]
    MissingWallet { booking_id: BookingId, party: &'static str },
    #[error("Cancellation policy {0} does not apply to this booking and requester")]
    PolicyNotApplicable(i64),
    #[error("{0}")]
    Fee(#[from] FeeError),
    #[error("{0}")]
    Signer(#[from] SignerError),
    #[error("{0}")]
    Store(#[from] LedgerStoreError),
}

impl From<PolicyError> for AuthorizationApiError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::BookingNotFound(id) => Self::BookingNotFound(id),
            PolicyError::Unauthorized { user_id, booking_id } => Self::Unauthorized { user_id, booking_id },
            PolicyError::Store(e) => Self::Store(e),
        }
    }
}
