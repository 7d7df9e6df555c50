//! Booking Settlement Engine
//!
//! The settlement engine is the off-chain half of a marketplace's escrow-backed booking payments. Money moves on-chain,
//! in an escrow contract; this library decides what the contract is allowed to do, and keeps the marketplace's ledger
//! in step with what the contract actually did.
//!
//! The library is divided into these main sections:
//! 1. The settlement public API ([`mod@settlement_api`]). Booking transitions, cancellation policy evaluation and the
//!    issuing of signed authorizations. Use these rather than the backend directly.
//! 2. The signing and pricing primitives: the [`fees`] calculator, the EIP-712 [`signer`] and the cancellation
//!    [`policy`] rules. These are pure and have no storage dependencies.
//! 3. The chain event [`pipeline`]. A subscription to the escrow contract's logs feeds a durable queue, which a worker
//!    drains through an idempotent processor. A bounded reconnection manager and a backup reconciler keep the ledger
//!    correct when the subscription misbehaves.
//! 4. Storage. The [`traits`] module defines what a backend must provide, and [`SqliteDatabase`] provides it.
//!
//! The engine also provides a set of [`events`] that can be subscribed to. When chain activity changes a booking, the
//! processor publishes a notification. A simple Actor framework is used so that you can easily hook into these events
//! and perform custom actions.
pub mod chain;
pub mod db_types;
pub mod events;
pub mod fees;
pub mod helpers;
pub mod pipeline;
pub mod policy;
pub mod signer;
pub mod traits;

mod settlement_api;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use pipeline::EventQueue;
pub use settlement_api::{
    authorization_api::{AuthorizationApi, CancellationAuthorizationResult, CancellationSplit, PaymentAuthorization},
    booking_flow_api::BookingFlowApi,
    cancellation_policy_api::{CancellationPolicyApi, PolicyQuote},
    errors::{AuthorizationApiError, BookingFlowError, PolicyError},
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
