use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    BookingStateChanged,
    ChainEventObserved,
    EventHandler,
    EventProducer,
    Handler,
    MeetingReleaseRequested,
};

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub booking_state_changed_producer: Vec<EventProducer<BookingStateChanged>>,
    pub chain_event_observed_producer: Vec<EventProducer<ChainEventObserved>>,
    pub meeting_release_producer: Vec<EventProducer<MeetingReleaseRequested>>,
}

impl EventProducers {
    pub async fn publish_booking_state_changed(&self, event: BookingStateChanged) {
        for producer in &self.booking_state_changed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_chain_event_observed(&self, event: ChainEventObserved) {
        for producer in &self.chain_event_observed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_meeting_release(&self, event: MeetingReleaseRequested) {
        for producer in &self.meeting_release_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_booking_state_changed: Option<EventHandler<BookingStateChanged>>,
    pub on_chain_event_observed: Option<EventHandler<ChainEventObserved>>,
    pub on_meeting_release: Option<EventHandler<MeetingReleaseRequested>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_booking_state_changed = hooks.on_booking_state_changed.map(|f| EventHandler::new(buffer_size, f));
        let on_chain_event_observed = hooks.on_chain_event_observed.map(|f| EventHandler::new(buffer_size, f));
        let on_meeting_release = hooks.on_meeting_release.map(|f| EventHandler::new(buffer_size, f));
        Self { on_booking_state_changed, on_chain_event_observed, on_meeting_release }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_booking_state_changed {
            result.booking_state_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_chain_event_observed {
            result.chain_event_observed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_meeting_release {
            result.meeting_release_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns a task per registered handler. Each task ends once every producer for it has been dropped.
    pub fn start_handlers(self) {
        if let Some(handler) = self.on_booking_state_changed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_chain_event_observed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_meeting_release {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_booking_state_changed: Option<Handler<BookingStateChanged>>,
    pub on_chain_event_observed: Option<Handler<ChainEventObserved>>,
    pub on_meeting_release: Option<Handler<MeetingReleaseRequested>>,
}

impl EventHooks {
    pub fn on_booking_state_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(BookingStateChanged) -> HookFuture) + Send + Sync + 'static {
        self.on_booking_state_changed = Some(Arc::new(f));
        self
    }

    pub fn on_chain_event_observed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ChainEventObserved) -> HookFuture) + Send + Sync + 'static {
        self.on_chain_event_observed = Some(Arc::new(f));
        self
    }

    pub fn on_meeting_release<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(MeetingReleaseRequested) -> HookFuture) + Send + Sync + 'static {
        self.on_meeting_release = Some(Arc::new(f));
        self
    }
}
