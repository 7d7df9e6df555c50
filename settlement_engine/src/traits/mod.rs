//! # Ledger store contracts
//!
//! The interfaces that a persistence backend must implement to serve the settlement engine.
//!
//! * [`LedgerStore`] owns bookings, authorization nonces, cancellation policies, chain event records, the earnings
//!   transaction ledger and provider earnings totals.
//! * [`QueueBackend`] is the durable storage behind the [`crate::EventQueue`].
//!
//! [`crate::SqliteDatabase`] implements both.
mod ledger_store;
mod queue_backend;

pub use ledger_store::{LedgerStore, LedgerStoreError};
pub use queue_backend::{QueueBackend, QueueEntry};
