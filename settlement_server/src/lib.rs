//! # Booking settlement server
//! This crate hosts the settlement engine behind a small HTTP API. It is responsible for:
//! * Issuing signed payment and cancellation authorizations to booking participants.
//! * Telling participants which cancellation policies they may invoke.
//! * Running the chain event monitor, and letting operators start, stop and inspect it.
//! * Launching backup reconciliations for bookings whose completion event may have been missed.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/monitor/status`, `/monitor/start`, `/monitor/stop`: event monitor control.
//! * `/monitor/reconcile/{booking_id}`: start a backup reconciliation.
//! * `/bookings/{id}/cancellation_policies`: the policies the requesting user may invoke.
//! * `/bookings/{id}/payment_authorization`: a signed payment authorization.
//! * `/bookings/{id}/cancellation_authorization`: a signed cancellation authorization.
//!
//! Every `/bookings` route identifies the caller by the `X-Authenticated-User` header, which an upstream
//! authentication layer is trusted to set.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod monitor_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
