use tokio::sync::mpsc;

use crate::{
    chain::{ChainError, ChainEventEnvelope},
    db_types::ChainBookingId,
};

pub type SubscriptionItem = Result<ChainEventEnvelope, ChainError>;

/// A live stream of decoded contract events.
///
/// The stream ends (`next` returns `None`) when the underlying transport closes. A transport error is delivered as an
/// `Err` item; the subscription should be considered dead after one.
pub struct EventSubscription {
    receiver: mpsc::Receiver<SubscriptionItem>,
}

impl EventSubscription {
    pub fn new(receiver: mpsc::Receiver<SubscriptionItem>) -> Self {
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        self.receiver.recv().await
    }
}

/// The blockchain, as far as the settlement pipeline is concerned.
#[allow(async_fn_in_trait)]
pub trait ChainEventSource {
    /// Opens a new subscription to the escrow contract's events. Resolves once the subscription is established.
    async fn subscribe(&self) -> Result<EventSubscription, ChainError>;

    /// The latest block number.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Searches blocks `from_block..=to_block` for `ServiceCompleted` events for the given booking.
    async fn completion_events(
        &self,
        booking_id: ChainBookingId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainEventEnvelope>, ChainError>;
}
