use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{chain::ChainEventEnvelope, traits::LedgerStoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub envelope: ChainEventEnvelope,
    pub enqueued_at: DateTime<Utc>,
}

/// Durable FIFO storage for chain events awaiting processing.
///
/// Delivery is at-least-once: a claimed entry that is not acknowledged within its lease becomes claimable again.
#[allow(async_fn_in_trait)]
pub trait QueueBackend: Clone {
    /// Appends an entry to the tail of the queue, returning its id.
    async fn enqueue(&self, envelope: &ChainEventEnvelope) -> Result<i64, LedgerStoreError>;

    /// Claims up to `limit` entries from the head of the queue, skipping entries whose lease is still live.
    async fn claim_batch(&self, limit: usize, lease: Duration) -> Result<Vec<QueueEntry>, LedgerStoreError>;

    /// Removes an entry from the queue.
    async fn ack(&self, id: i64) -> Result<(), LedgerStoreError>;

    /// The number of entries in the queue, claimed or not.
    async fn depth(&self) -> Result<u64, LedgerStoreError>;
}
