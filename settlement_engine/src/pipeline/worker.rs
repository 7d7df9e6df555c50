use std::{sync::Arc, time::Duration};

use log::*;
use tokio::sync::watch;

use crate::{
    pipeline::{EventProcessor, EventQueue},
    traits::{LedgerStore, QueueBackend, QueueEntry},
};

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_IDLE_SWEEP: Duration = Duration::from_secs(60);
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum number of entries claimed per round trip to the queue.
    pub batch_size: usize,
    /// How long to wait for a notification before sweeping the queue anyway. Picks up redelivered entries whose lease
    /// expired.
    pub idle_sweep: Duration,
    /// How long a claimed entry stays invisible to other claims.
    pub claim_lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, idle_sweep: DEFAULT_IDLE_SWEEP, claim_lease: DEFAULT_CLAIM_LEASE }
    }
}

/// Drains the event queue into the processor.
pub struct QueueWorker<B, Q> {
    queue: EventQueue<Q>,
    processor: Arc<EventProcessor<B>>,
    config: WorkerConfig,
}

impl<B, Q> QueueWorker<B, Q>
where
    B: LedgerStore,
    Q: QueueBackend,
{
    pub fn new(queue: EventQueue<Q>, processor: Arc<EventProcessor<B>>, config: WorkerConfig) -> Self {
        Self { queue, processor, config }
    }

    /// Runs until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Each wake-up drains the queue completely before waiting again.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("⚙️ Queue worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let handled = self.drain().await;
            if handled > 0 {
                debug!("⚙️ Drained {handled} queued events");
            }
            tokio::select! {
                _ = self.queue.notified() => trace!("⚙️ Queue worker woken by a new event"),
                _ = tokio::time::sleep(self.config.idle_sweep) => trace!("⚙️ Queue worker idle sweep"),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            }
        }
        info!("⚙️ Queue worker stopped");
    }

    /// Claims and processes batches until the queue has nothing claimable. Returns the number of entries handled.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        loop {
            let batch = match self.queue.claim_batch(self.config.batch_size, self.config.claim_lease).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("⚙️ Could not claim queued events. Will try again on the next wake-up. {e}");
                    break;
                },
            };
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                self.handle(entry).await;
                handled += 1;
            }
        }
        handled
    }

    async fn handle(&self, entry: QueueEntry) {
        let QueueEntry { id, envelope, .. } = entry;
        let ack = match self.processor.process_event(&envelope).await {
            Ok(_) => true,
            Err(e) if e.is_transient() => {
                warn!("⚙️ Queue entry #{id} hit a transient error and will be redelivered after its lease. {e}");
                false
            },
            Err(e) => {
                warn!("⚙️ Queue entry #{id} cannot be applied and has been recorded as FAILED. {e}");
                true
            },
        };
        if ack {
            if let Err(e) = self.queue.ack(id).await {
                error!("⚙️ Could not acknowledge queue entry #{id}. It will be redelivered. {e}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        db_types::BookingStatus,
        events::EventProducers,
        pipeline::{MemoryQueue, MonitorStatus},
        test_utils::{sample_completion, sample_payment, seed_booking, MemoryLedger},
    };

    fn worker(db: MemoryLedger, queue: EventQueue<MemoryQueue>) -> QueueWorker<MemoryLedger, MemoryQueue> {
        let processor = EventProcessor::new(db, EventProducers::default(), 6, Arc::new(MonitorStatus::default()));
        QueueWorker::new(queue, Arc::new(processor), WorkerConfig { batch_size: 2, ..Default::default() })
    }

    #[tokio::test]
    async fn drain_processes_everything_in_batches() {
        let db = MemoryLedger::default();
        for id in ["a", "b", "c"] {
            seed_booking(&db, id, BookingStatus::PendingPayment).await;
        }
        let queue = EventQueue::new(MemoryQueue::new());
        for id in ["a", "b", "c"] {
            queue.push(&sample_payment(id, 0)).await.unwrap();
        }
        let worker = worker(db.clone(), queue.clone());
        assert_eq!(worker.drain().await, 3);
        assert_eq!(queue.depth().await.unwrap(), 0);
        for id in ["a", "b", "c"] {
            let booking = db.fetch_booking(&id.parse().unwrap()).await.unwrap().unwrap();
            assert_eq!(booking.status, BookingStatus::Paid);
        }
    }

    #[tokio::test]
    async fn permanent_failures_are_acknowledged() {
        let db = MemoryLedger::default();
        let queue = EventQueue::new(MemoryQueue::new());
        queue.push(&sample_completion("unknown", 0)).await.unwrap();
        let worker = worker(db.clone(), queue.clone());
        assert_eq!(worker.drain().await, 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_failures_stay_queued() {
        let db = MemoryLedger::default();
        seed_booking(&db, "a", BookingStatus::PendingPayment).await;
        db.fail_writes(true);
        let queue = EventQueue::new(MemoryQueue::new());
        queue.push(&sample_payment("a", 0)).await.unwrap();
        let worker = worker(db.clone(), queue.clone());
        assert_eq!(worker.drain().await, 1);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_wakes_on_push_and_stops_on_shutdown() {
        let db = MemoryLedger::default();
        seed_booking(&db, "a", BookingStatus::PendingPayment).await;
        let queue = EventQueue::new(MemoryQueue::new());
        let worker = worker(db.clone(), queue.clone());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });
        queue.push(&sample_payment("a", 0)).await.unwrap();
        let mut processed = false;
        for _ in 0..100 {
            if queue.depth().await.unwrap() == 0 {
                processed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(processed);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
