//! # Authorization signer
//!
//! Produces EIP-712 signatures that the escrow contract accepts as proof that the platform approved a payment or a
//! cancellation split. Each authorization binds the parties, the amounts, the fee rates, an absolute expiry and a
//! single-use nonce.
mod authorization_signer;
mod typed_data;

use chrono::{DateTime, Utc};
use ethers::types::Address;
use thiserror::Error;

pub use authorization_signer::{
    AuthorizationSigner,
    BookingPaymentTerms,
    CancellationTerms,
    SignedAuthorization,
    SignerConfig,
    DEFAULT_AUTHORIZATION_WINDOW_SECS,
};
pub use typed_data::{
    AuthorizationMessage,
    BookingAuthorization,
    CancellationAuthorization,
    TypedAuthorization,
    BOOKING_AUTHORIZATION_TYPE,
    CANCELLATION_AUTHORIZATION_TYPE,
};

use crate::helpers::UnitsError;

#[derive(Debug, Clone, Error)]
pub enum SignerError {
    #[error("No signing key has been configured. Authorizations cannot be issued.")]
    MissingSigningKey,
    #[error("The configured signing key is not a valid secp256k1 private key")]
    InvalidSigningKey,
    #[error("Could not sign the authorization: {0}")]
    Signing(String),
    #[error("Could not convert amount for signing. {0}")]
    Units(#[from] UnitsError),
    #[error("The authorization expired at {expired_at} (it is now {now})")]
    Expired { expired_at: DateTime<Utc>, now: DateTime<Utc> },
    #[error("Could not recover the signer from the signature: {0}")]
    Recovery(String),
    #[error("Signature was produced by {recovered:#x}, not {expected:#x}")]
    SignerMismatch { expected: Address, recovered: Address },
}
