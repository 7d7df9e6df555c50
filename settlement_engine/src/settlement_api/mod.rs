//! # Booking settlement public API
//!
//! The `settlement_api` module exposes the programmatic API for the off-chain side of booking settlement. Each API
//! is constructed from a backend that implements [`crate::traits::LedgerStore`], so the same code runs against
//! SQLite in production and against an in-memory ledger in tests.
//!
//! * [`booking_flow_api`] moves bookings through the transitions that users drive (accept, start, reject, cancel
//!   before payment). Transitions into `paid` and `completed` are left to the event processor.
//! * [`cancellation_policy_api`] evaluates which cancellation policies a user may invoke, and what they would pay out.
//! * [`authorization_api`] issues the EIP-712 authorizations the escrow contract requires, and records their nonces.
//!
//! # API usage
//!
//! ```rust,ignore
//! use settlement_engine::{AuthorizationApi, AuthorizationSigner, SqliteDatabase, SystemClock};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let signer = AuthorizationSigner::new(config, Some(&key), SystemClock::shared())?;
//! let api = AuthorizationApi::new(db, signer, SystemClock::shared());
//! let auth = api.authorize_booking_payment(&booking_id, "customer-1").await?;
//! ```

pub mod authorization_api;
pub mod booking_flow_api;
pub mod cancellation_policy_api;
pub mod errors;
