//! # Chain ingestion
//!
//! Everything that talks to the blockchain: decoding escrow contract logs into [`ChainEvent`]s, the
//! [`ChainEventSource`] abstraction over a live subscription plus historical queries, and its `ethers` implementation.
mod ethers_source;
mod events;
mod source;

use ethers::types::H256;
pub use ethers_source::EthersChainSource;
pub use events::{
    ChainEvent,
    ChainEventEnvelope,
    ChainEventKind,
    BOOKING_CANCELLED_SIGNATURE,
    PAYMENT_CONFIRMED_SIGNATURE,
    SERVICE_COMPLETED_SIGNATURE,
};
pub use source::{ChainEventSource, EventSubscription, SubscriptionItem};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Could not connect to the chain node: {0}")]
    Connection(String),
    #[error("Log subscription failed: {0}")]
    Subscription(String),
    #[error("Chain query failed: {0}")]
    Query(String),
    #[error("Could not decode contract log. {0}")]
    Decode(String),
    #[error("Log with topic {0:#x} is not an escrow contract event")]
    UnknownEvent(H256),
    #[error("Invalid chain configuration: {0}")]
    Configuration(String),
}
