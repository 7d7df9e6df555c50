//! # Event pipeline
//!
//! Chain events flow through the pipeline in three decoupled stages:
//!
//! 1. The [`ConnectionManager`] keeps a log subscription alive, reconnecting with bounded exponential backoff, and
//!    pushes every decoded event onto the [`EventQueue`]. It does no ledger work.
//! 2. The [`EventQueue`] stores events durably and wakes the worker through a notification channel, so nothing
//!    busy-polls.
//! 3. The [`QueueWorker`] drains the queue in small batches and hands each event to the [`EventProcessor`], which
//!    applies it to the ledger idempotently.
//!
//! The [`EventMonitor`] runs stages 1 and 3 together. The [`BackupReconciler`] is a safety net that looks for a
//! missed completion event in recent chain history and feeds it through the same processor.
mod connection;
mod monitor;
mod processor;
mod queue;
mod reconciler;
mod status;
mod worker;

pub use connection::{BackoffPolicy, ConnectionManager};
pub use monitor::{EventMonitor, MonitorConfig};
pub use processor::{EventProcessor, ProcessingOutcome, DEFAULT_DEDUP_CACHE_SIZE};
pub use queue::{EventQueue, MemoryQueue};
pub use reconciler::{BackupReconciler, BlockRange, ReconcilerConfig, ReconciliationOutcome};
pub use status::{ConnectionState, MonitorStatus, StatusSnapshot};
use ethers::types::U256;
use thiserror::Error;
pub use worker::{QueueWorker, WorkerConfig};

use crate::{
    chain::ChainError,
    db_types::{BookingId, ChainBookingId},
    helpers::UnitsError,
    traits::LedgerStoreError,
};

#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    #[error("No booking exists for on-chain id {0}")]
    BookingNotFound(ChainBookingId),
    #[error("{0}")]
    Store(#[from] LedgerStoreError),
    #[error("On-chain amount cannot be represented. {0}")]
    Units(#[from] UnitsError),
    #[error("Could not serialize event. {0}")]
    Serialization(String),
    #[error("On-chain fee rate {0} is more than 10000 basis points")]
    InvalidFeeRate(U256),
}

impl ProcessingError {
    /// Transient errors leave the queue entry unacknowledged so that it is redelivered after its lease expires.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<ChainError> for ProcessingError {
    fn from(e: ChainError) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    #[error("Gave up reconnecting to the chain after {0} attempts")]
    ReconnectAttemptsExhausted(u32),
    #[error("The event monitor is already running")]
    AlreadyRunning,
    #[error("The event monitor is not running")]
    NotRunning,
    #[error("Booking {0} does not exist")]
    BookingNotFound(BookingId),
    #[error("{0}")]
    Store(#[from] LedgerStoreError),
    #[error("{0}")]
    Chain(#[from] ChainError),
}
