//! Notification hooks.
//!
//! The processor publishes a notification whenever chain activity changes a booking. Other parts of the system
//! (websocket fan-out to clients, calendar clean-up) subscribe by registering async handlers in [`EventHooks`].
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
