use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::{sync::mpsc, time::Instant};

use crate::{
    chain::{ChainError, ChainEventEnvelope, ChainEventSource, EventSubscription, SubscriptionItem},
    db_types::ChainBookingId,
};

/// What the next call to `subscribe` on a [`FakeChainSource`] does.
#[derive(Debug, Clone)]
pub enum FakeSubscription {
    /// The connection is refused.
    Fail,
    /// The events are delivered, then the subscription closes.
    Deliver(Vec<ChainEventEnvelope>),
    /// The events are delivered and the subscription stays open.
    Hold(Vec<ChainEventEnvelope>),
}

struct FakeChainState {
    subscriptions: VecDeque<FakeSubscription>,
    open: Vec<mpsc::Sender<SubscriptionItem>>,
    subscribe_calls: Vec<Instant>,
    block_number: u64,
    head_unavailable: bool,
    completions: VecDeque<Vec<ChainEventEnvelope>>,
    completion_queries: Vec<(u64, u64, Instant)>,
}

/// A scripted [`ChainEventSource`] that records when it was called. Unscripted subscriptions fail and unscripted
/// completion queries find nothing.
#[derive(Clone)]
pub struct FakeChainSource {
    state: Arc<Mutex<FakeChainState>>,
}

impl Default for FakeChainSource {
    fn default() -> Self {
        let state = FakeChainState {
            subscriptions: VecDeque::new(),
            open: Vec::new(),
            subscribe_calls: Vec::new(),
            block_number: 1000,
            head_unavailable: false,
            completions: VecDeque::new(),
            completion_queries: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }
}

impl FakeChainSource {
    fn lock(&self) -> MutexGuard<'_, FakeChainState> {
        self.state.lock().expect("fake chain lock poisoned")
    }

    pub fn script_subscription(&self, subscription: FakeSubscription) {
        self.lock().subscriptions.push_back(subscription);
    }

    pub fn script_completions(&self, events: Vec<ChainEventEnvelope>) {
        self.lock().completions.push_back(events);
    }

    pub fn set_block_number(&self, block: u64) {
        self.lock().block_number = block;
    }

    /// While set, reading the chain head fails.
    pub fn set_head_unavailable(&self, unavailable: bool) {
        self.lock().head_unavailable = unavailable;
    }

    pub fn subscribe_calls(&self) -> Vec<Instant> {
        self.lock().subscribe_calls.clone()
    }

    /// `(from_block, to_block, when)` for every completion query.
    pub fn completion_queries(&self) -> Vec<(u64, u64, Instant)> {
        self.lock().completion_queries.clone()
    }
}

fn channel_with(events: Vec<ChainEventEnvelope>) -> (mpsc::Sender<SubscriptionItem>, EventSubscription) {
    let (sender, receiver) = mpsc::channel(events.len() + 1);
    for event in events {
        let _ = sender.try_send(Ok(event));
    }
    (sender, EventSubscription::new(receiver))
}

impl ChainEventSource for FakeChainSource {
    async fn subscribe(&self) -> Result<EventSubscription, ChainError> {
        let mut state = self.lock();
        state.subscribe_calls.push(Instant::now());
        match state.subscriptions.pop_front().unwrap_or(FakeSubscription::Fail) {
            FakeSubscription::Fail => Err(ChainError::Connection("connection refused".into())),
            FakeSubscription::Deliver(events) => Ok(channel_with(events).1),
            FakeSubscription::Hold(events) => {
                let (sender, subscription) = channel_with(events);
                state.open.push(sender);
                Ok(subscription)
            },
        }
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let state = self.lock();
        if state.head_unavailable {
            return Err(ChainError::Connection("chain head unavailable".into()));
        }
        Ok(state.block_number)
    }

    async fn completion_events(
        &self,
        booking_id: ChainBookingId,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainEventEnvelope>, ChainError> {
        let mut state = self.lock();
        state.completion_queries.push((from_block, to_block, Instant::now()));
        let events = state.completions.pop_front().unwrap_or_default();
        Ok(events.into_iter().filter(|e| e.booking_id() == booking_id).collect())
    }
}
