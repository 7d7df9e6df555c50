use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;
use log::*;
use tokio::{sync::Notify, time::Instant};

use crate::{
    chain::ChainEventEnvelope,
    traits::{LedgerStoreError, QueueBackend, QueueEntry},
};

/// The durable event queue plus its wake-up signal.
///
/// Pushing an entry stores it in the backend and then signals the notification channel. If no consumer is waiting,
/// the signal is remembered and the next call to [`EventQueue::notified`] returns immediately.
#[derive(Clone)]
pub struct EventQueue<Q> {
    backend: Q,
    notify: Arc<Notify>,
}

impl<Q> EventQueue<Q> {
    pub fn new(backend: Q) -> Self {
        Self { backend, notify: Arc::new(Notify::new()) }
    }

    pub fn backend(&self) -> &Q {
        &self.backend
    }

    /// Resolves on the next push (or immediately, if a push happened since the last wake-up).
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Wakes the consumer without pushing anything.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

impl<Q: QueueBackend> EventQueue<Q> {
    pub async fn push(&self, envelope: &ChainEventEnvelope) -> Result<i64, LedgerStoreError> {
        let id = self.backend.enqueue(envelope).await?;
        trace!("📥️ {} for booking {} queued as #{id}", envelope.kind(), envelope.booking_id());
        self.notify.notify_one();
        Ok(id)
    }

    pub async fn claim_batch(&self, limit: usize, lease: Duration) -> Result<Vec<QueueEntry>, LedgerStoreError> {
        self.backend.claim_batch(limit, lease).await
    }

    pub async fn ack(&self, id: i64) -> Result<(), LedgerStoreError> {
        self.backend.ack(id).await
    }

    pub async fn depth(&self) -> Result<u64, LedgerStoreError> {
        self.backend.depth().await
    }
}

struct MemoryEntry {
    entry: QueueEntry,
    claimed_at: Option<Instant>,
}

#[derive(Default)]
struct MemoryQueueInner {
    next_id: i64,
    entries: VecDeque<MemoryEntry>,
}

/// A non-durable [`QueueBackend`], for tests and for running without a database.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<MemoryQueueInner>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryQueueInner>, LedgerStoreError> {
        self.inner.lock().map_err(|_| LedgerStoreError::DatabaseError("Memory queue lock is poisoned".into()))
    }
}

impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, envelope: &ChainEventEnvelope) -> Result<i64, LedgerStoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        let entry = QueueEntry { id, envelope: envelope.clone(), enqueued_at: Utc::now() };
        inner.entries.push_back(MemoryEntry { entry, claimed_at: None });
        Ok(id)
    }

    async fn claim_batch(&self, limit: usize, lease: Duration) -> Result<Vec<QueueEntry>, LedgerStoreError> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        let claimable = inner
            .entries
            .iter_mut()
            .filter(|e| e.claimed_at.map(|t| now.duration_since(t) >= lease).unwrap_or(true))
            .take(limit);
        let mut batch = Vec::with_capacity(limit);
        for e in claimable {
            e.claimed_at = Some(now);
            batch.push(e.entry.clone());
        }
        Ok(batch)
    }

    async fn ack(&self, id: i64) -> Result<(), LedgerStoreError> {
        let mut inner = self.lock()?;
        inner.entries.retain(|e| e.entry.id != id);
        Ok(())
    }

    async fn depth(&self) -> Result<u64, LedgerStoreError> {
        Ok(self.lock()?.entries.len() as u64)
    }
}
