use std::{sync::Arc, time::Duration};

use log::*;
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    chain::ChainEventSource,
    db_types::{BookingId, BookingStatus},
    pipeline::{EventProcessor, MonitorError},
    traits::LedgerStore,
};

pub const DEFAULT_RECONCILE_ATTEMPTS: u32 = 6;
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BLOCK_RANGE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub attempts: u32,
    /// Wait before each attempt
    pub interval: Duration,
    /// How many blocks back from the chain head to search
    pub block_range: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RECONCILE_ATTEMPTS,
            interval: DEFAULT_RECONCILE_INTERVAL,
            block_range: DEFAULT_BLOCK_RANGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    /// The booking was (or became) complete without the reconciler's help. `attempt` is 0 if it was complete on entry.
    AlreadyCompleted { attempt: u32 },
    /// A missed completion event was found and processed.
    Reconciled { attempt: u32, tx_hash: Option<String> },
    /// Nothing was found. This has been logged as an error for manual follow-up. `searched` is the last block range
    /// queried, or `None` if the chain head could never be read.
    Exhausted { attempts: u32, searched: Option<BlockRange> },
}

/// Looks for a booking's completion event in recent chain history, in case the live subscription missed it.
///
/// Anything found goes through the same [`EventProcessor`] as live events, so racing the live pipeline is harmless.
pub struct BackupReconciler<B, S> {
    source: S,
    processor: Arc<EventProcessor<B>>,
    config: ReconcilerConfig,
}

impl<B, S> BackupReconciler<B, S>
where
    B: LedgerStore,
    S: ChainEventSource,
{
    pub fn new(source: S, processor: Arc<EventProcessor<B>>, config: ReconcilerConfig) -> Self {
        Self { source, processor, config }
    }

    pub async fn reconcile(&self, booking_id: &BookingId) -> Result<ReconciliationOutcome, MonitorError> {
        let started = Instant::now();
        let booking = self
            .processor
            .db()
            .fetch_booking(booking_id)
            .await?
            .ok_or_else(|| MonitorError::BookingNotFound(booking_id.clone()))?;
        if booking.status == BookingStatus::Completed {
            debug!("🛟️ Booking {booking_id} is already complete. Nothing to reconcile.");
            return Ok(ReconciliationOutcome::AlreadyCompleted { attempt: 0 });
        }
        let chain_id = booking.chain_booking_id;
        info!("🛟️ Watching for the completion of booking {booking_id} ({chain_id})");
        let mut searched = None;
        for attempt in 1..=self.config.attempts {
            tokio::time::sleep(self.config.interval).await;
            if self.is_completed(booking_id).await? {
                debug!("🛟️ Booking {booking_id} completed via the live pipeline");
                return Ok(ReconciliationOutcome::AlreadyCompleted { attempt });
            }
            let latest = match self.source.block_number().await {
                Ok(n) => n,
                Err(e) => {
                    warn!("🛟️ Attempt {attempt} for booking {booking_id}: could not read the chain head. {e}");
                    continue;
                },
            };
            let from_block = latest.saturating_sub(self.config.block_range);
            let to_block = latest;
            searched = Some(BlockRange { from_block, to_block });
            let events = match self.source.completion_events(chain_id, from_block, to_block).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("🛟️ Attempt {attempt} for booking {booking_id}: log query failed. {e}");
                    continue;
                },
            };
            let Some(envelope) = events.into_iter().next() else {
                debug!("🛟️ Attempt {attempt}: no completion for {booking_id} in blocks {from_block}..={to_block}");
                continue;
            };
            match self.processor.process_event(&envelope).await {
                Ok(outcome) => {
                    info!(
                        "🛟️ Recovered missed completion of booking {booking_id} from tx {} ({outcome:?})",
                        envelope.tx_hash_hex().unwrap_or_default()
                    );
                    return Ok(ReconciliationOutcome::Reconciled { attempt, tx_hash: envelope.tx_hash_hex() });
                },
                Err(e) => {
                    warn!("🛟️ Attempt {attempt}: found a completion for {booking_id} but could not apply it. {e}")
                },
            }
        }
        let attempts = self.config.attempts;
        let range = match searched {
            Some(r) => format!("from_block={} to_block={}", r.from_block, r.to_block),
            None => "blocks_checked=none".to_string(),
        };
        error!(
            "🛟️ Completion not found. booking_id={booking_id} chain_booking_id={chain_id} {range} attempts={attempts} \
             elapsed_secs={}",
            started.elapsed().as_secs()
        );
        Ok(ReconciliationOutcome::Exhausted { attempts, searched })
    }

    async fn is_completed(&self, booking_id: &BookingId) -> Result<bool, MonitorError> {
        let booking = self.processor.db().fetch_booking(booking_id).await?;
        Ok(booking.map(|b| b.status == BookingStatus::Completed).unwrap_or(false))
    }
}
