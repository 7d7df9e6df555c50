use std::sync::Arc;

use log::*;
use tokio::sync::watch;

use crate::{
    chain::ChainEventSource,
    pipeline::{
        BackoffPolicy,
        ConnectionManager,
        EventProcessor,
        EventQueue,
        MonitorError,
        MonitorStatus,
        QueueWorker,
        StatusSnapshot,
        WorkerConfig,
    },
    traits::{LedgerStore, QueueBackend},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorConfig {
    pub backoff: BackoffPolicy,
    pub worker: WorkerConfig,
}

/// Runs the connection manager and the queue worker side by side.
///
/// The two halves only share the queue. When the connection manager stops, for whatever reason, the worker is told
/// to stop as well. Entries still in the queue are picked up on the next start.
pub struct EventMonitor<B, S, Q> {
    connection: ConnectionManager<S, Q>,
    worker: QueueWorker<B, Q>,
    queue: EventQueue<Q>,
    status: Arc<MonitorStatus>,
}

impl<B, S, Q> EventMonitor<B, S, Q>
where
    B: LedgerStore,
    S: ChainEventSource,
    Q: QueueBackend,
{
    pub fn new(source: S, queue: EventQueue<Q>, processor: Arc<EventProcessor<B>>, config: MonitorConfig) -> Self {
        let status = Arc::clone(processor.status());
        let connection = ConnectionManager::new(source, queue.clone(), config.backoff, Arc::clone(&status));
        let worker = QueueWorker::new(queue.clone(), processor, config.worker);
        Self { connection, worker, queue, status }
    }

    pub fn status(&self) -> &Arc<MonitorStatus> {
        &self.status
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let depth = match self.queue.depth().await {
            Ok(depth) => Some(depth),
            Err(e) => {
                warn!("📥️ Could not read the queue depth. {e}");
                None
            },
        };
        self.status.snapshot(depth)
    }

    /// Runs until `shutdown` flips to `true`, or until the connection manager gives up reconnecting.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        if self.status.set_running(true) {
            return Err(MonitorError::AlreadyRunning);
        }
        info!("🔗️ Event monitor started");
        let (stop_worker, worker_shutdown) = watch::channel(false);
        let connection = async {
            let result = self.connection.run(shutdown).await;
            let _ = stop_worker.send(true);
            result
        };
        let (result, ()) = tokio::join!(connection, self.worker.run(worker_shutdown));
        self.status.set_running(false);
        match &result {
            Ok(()) => info!("🔗️ Event monitor stopped"),
            Err(e) => error!("🔗️ Event monitor stopped. {e}"),
        }
        result
    }
}
