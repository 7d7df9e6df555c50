use std::{
    fmt::Display,
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Listening,
    ReconnectScheduled { attempt: u32, delay_secs: u64 },
    Failed { attempts: u32 },
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::ReconnectScheduled { attempt, delay_secs } => {
                write!(f, "reconnect #{attempt} scheduled in {delay_secs}s")
            },
            Self::Failed { attempts } => write!(f, "failed after {attempts} reconnect attempts"),
        }
    }
}

/// Live operational state of the event monitor, shared between its components and whoever reports on it.
#[derive(Debug)]
pub struct MonitorStatus {
    state: watch::Sender<ConnectionState>,
    running: AtomicBool,
    reconnect_attempts: AtomicU32,
    events_ingested: AtomicU64,
    events_processed: AtomicU64,
    events_skipped: AtomicU64,
    events_failed: AtomicU64,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            running: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            events_ingested: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_skipped: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
        }
    }
}

impl MonitorStatus {
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every connection state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sets the running flag, returning its previous value.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::SeqCst);
    }

    pub fn record_ingested(&self) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.events_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_depth: Option<u64>) -> StatusSnapshot {
        StatusSnapshot {
            running: self.is_running(),
            connection: self.connection_state(),
            reconnect_attempts: self.reconnect_attempts(),
            queue_depth,
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    /// `None` if the queue could not be read
    pub queue_depth: Option<u64>,
    pub events_ingested: u64,
    pub events_processed: u64,
    pub events_skipped: u64,
    pub events_failed: u64,
}
