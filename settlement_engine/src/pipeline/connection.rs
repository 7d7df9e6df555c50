use std::{sync::Arc, time::Duration};

use log::*;
use tokio::sync::watch;

use crate::{
    chain::{ChainError, ChainEventEnvelope, ChainEventSource, EventSubscription},
    pipeline::{ConnectionState, EventQueue, MonitorError, MonitorStatus},
    traits::QueueBackend,
};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const ENQUEUE_RETRY_DELAY: Duration = Duration::from_secs(1);
const ENQUEUE_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Bounded exponential backoff: `base × 2^(attempt-1)`, capped at `max`, for at most `max_attempts` consecutive
/// reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base: DEFAULT_BASE_DELAY, max: DEFAULT_MAX_DELAY, max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS }
    }
}

impl BackoffPolicy {
    /// The delay before reconnect number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

enum ListenEnd {
    Shutdown,
    Closed,
    Failed(ChainError),
}

/// Keeps a subscription to the escrow contract open and moves every event it delivers onto the queue.
///
/// The attempt counter resets whenever a subscription is established, so only consecutive failures count towards
/// the limit.
pub struct ConnectionManager<S, Q> {
    source: S,
    queue: EventQueue<Q>,
    backoff: BackoffPolicy,
    status: Arc<MonitorStatus>,
}

impl<S, Q> ConnectionManager<S, Q>
where
    S: ChainEventSource,
    Q: QueueBackend,
{
    pub fn new(source: S, queue: EventQueue<Q>, backoff: BackoffPolicy, status: Arc<MonitorStatus>) -> Self {
        Self { source, queue, backoff, status }
    }

    /// Runs until shutdown is requested (`Ok`) or the reconnect attempts are used up (`Err`).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        let mut attempt = 0u32;
        self.status.set_reconnect_attempts(0);
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.status.set_state(ConnectionState::Connecting);
            let subscription = tokio::select! {
                result = self.source.subscribe() => result,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            match subscription {
                Ok(mut subscription) => {
                    info!("🔁️ Subscribed to escrow contract events");
                    attempt = 0;
                    self.status.set_reconnect_attempts(0);
                    self.status.set_state(ConnectionState::Listening);
                    match self.listen(&mut subscription, &mut shutdown).await {
                        ListenEnd::Shutdown => break,
                        ListenEnd::Closed => warn!("🔁️ The event subscription was closed by the node"),
                        ListenEnd::Failed(e) => warn!("🔁️ The event subscription failed. {e}"),
                    }
                },
                Err(e) => warn!("🔁️ Could not subscribe to escrow contract events. {e}"),
            }
            attempt += 1;
            if attempt > self.backoff.max_attempts {
                let attempts = self.backoff.max_attempts;
                self.status.set_state(ConnectionState::Failed { attempts });
                error!("🔁️ Giving up on the chain connection after {attempts} reconnect attempts");
                return Err(MonitorError::ReconnectAttemptsExhausted(attempts));
            }
            self.status.set_reconnect_attempts(attempt);
            let delay = self.backoff.delay_for(attempt);
            self.status.set_state(ConnectionState::ReconnectScheduled { attempt, delay_secs: delay.as_secs() });
            info!("🔁️ Reconnect attempt {attempt}/{} in {}s", self.backoff.max_attempts, delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        self.status.set_state(ConnectionState::Disconnected);
        info!("🔁️ Chain connection closed on request");
        Ok(())
    }

    async fn listen(&self, subscription: &mut EventSubscription, shutdown: &mut watch::Receiver<bool>) -> ListenEnd {
        loop {
            tokio::select! {
                item = subscription.next() => match item {
                    Some(Ok(envelope)) => {
                        if !self.ingest(envelope, shutdown).await {
                            return ListenEnd::Shutdown;
                        }
                    },
                    Some(Err(e)) => return ListenEnd::Failed(e),
                    None => return ListenEnd::Closed,
                },
                _ = shutdown_requested(shutdown) => return ListenEnd::Shutdown,
            }
        }
    }

    /// Pushes the event onto the queue. A failed push is retried with a doubling delay, capped at 30s, until it
    /// succeeds. Returns `false` if shutdown was requested before the event could be queued.
    async fn ingest(&self, envelope: ChainEventEnvelope, shutdown: &mut watch::Receiver<bool>) -> bool {
        debug!("🔁️ Received {} for booking {}", envelope.kind(), envelope.booking_id());
        let mut attempt = 1u32;
        let mut delay = ENQUEUE_RETRY_DELAY;
        loop {
            match self.queue.push(&envelope).await {
                Ok(_) => {
                    self.status.record_ingested();
                    return true;
                },
                Err(e) => {
                    warn!(
                        "🔁️ Could not queue {} (attempt {attempt}). Retrying in {}s. {e}",
                        envelope.dedup_key(),
                        delay.as_secs()
                    );
                },
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = shutdown_requested(shutdown) => {
                    error!(
                        "🔁️ Shutting down with {} for booking {} still unqueued after {attempt} attempts",
                        envelope.dedup_key(),
                        envelope.booking_id()
                    );
                    return false;
                },
            }
            attempt += 1;
            delay = delay.saturating_mul(2).min(ENQUEUE_MAX_RETRY_DELAY);
        }
    }
}

/// Resolves once shutdown has been requested, or the sender has gone away.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
