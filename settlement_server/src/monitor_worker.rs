use std::sync::Arc;

use log::*;
use settlement_engine::{
    chain::ChainEventSource,
    db_types::BookingId,
    pipeline::{BackupReconciler, EventMonitor, EventProcessor, MonitorError, ReconciliationOutcome, StatusSnapshot},
    traits::{LedgerStore, QueueBackend},
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

struct MonitorTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), MonitorError>>,
}

/// Owns the event monitor for the lifetime of the server and lets request handlers start, stop and inspect it.
///
/// Tasks are spawned on the current actix arbiter, so their futures need not be `Send`. At most one monitor run is
/// active at a time.
pub struct MonitorHandle<B, S, Q> {
    monitor: Arc<EventMonitor<B, S, Q>>,
    reconciler: Arc<BackupReconciler<B, S>>,
    processor: Arc<EventProcessor<B>>,
    task: Mutex<Option<MonitorTask>>,
}

impl<B, S, Q> MonitorHandle<B, S, Q>
where
    B: LedgerStore + 'static,
    S: ChainEventSource + 'static,
    Q: QueueBackend + 'static,
{
    pub fn new(
        monitor: EventMonitor<B, S, Q>,
        reconciler: BackupReconciler<B, S>,
        processor: Arc<EventProcessor<B>>,
    ) -> Self {
        Self { monitor: Arc::new(monitor), reconciler: Arc::new(reconciler), processor, task: Mutex::new(None) }
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.monitor.snapshot().await
    }

    pub fn is_running(&self) -> bool {
        self.monitor.status().is_running()
    }

    /// Starts the monitor in the background. Fails with [`MonitorError::AlreadyRunning`] if a previous run is still
    /// going.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let mut task = self.task.lock().await;
        if self.is_running() || task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Err(MonitorError::AlreadyRunning);
        }
        let (shutdown, rx) = watch::channel(false);
        let monitor = Arc::clone(&self.monitor);
        let handle = actix_web::rt::spawn(async move { monitor.run(rx).await });
        *task = Some(MonitorTask { shutdown, handle });
        info!("🔗️ Event monitor start requested");
        Ok(())
    }

    /// Signals the monitor to stop and waits for it to wind down.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let task = self.task.lock().await.take();
        let Some(MonitorTask { shutdown, handle }) = task else {
            return Err(MonitorError::NotRunning);
        };
        if handle.is_finished() {
            if let Ok(Err(e)) = handle.await {
                info!("🔗️ The event monitor had already stopped. {e}");
            }
            return Err(MonitorError::NotRunning);
        }
        let _ = shutdown.send(true);
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("🔗️ The event monitor task did not end cleanly. {e}");
                Ok(())
            },
        }
    }

    /// Launches a backup reconciliation for `booking_id` in the background.
    ///
    /// Returns as soon as the booking is known to exist; the outcome is only logged.
    pub async fn reconcile(
        &self,
        booking_id: BookingId,
    ) -> Result<JoinHandle<Option<ReconciliationOutcome>>, MonitorError> {
        if self.processor.db().fetch_booking(&booking_id).await?.is_none() {
            return Err(MonitorError::BookingNotFound(booking_id));
        }
        let reconciler = Arc::clone(&self.reconciler);
        let handle = actix_web::rt::spawn(async move {
            match reconciler.reconcile(&booking_id).await {
                Ok(outcome) => {
                    debug!("🛟️ Reconciliation of {booking_id} finished. {outcome:?}");
                    Some(outcome)
                },
                Err(e) => {
                    error!("🛟️ Reconciliation of {booking_id} failed. {e}");
                    None
                },
            }
        });
        Ok(handle)
    }
}
