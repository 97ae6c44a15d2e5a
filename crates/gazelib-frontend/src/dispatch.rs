//! Stream registry and event router.
//!
//! The [`Dispatcher`] maps each [`StreamId`] to at most one handler and
//! tracks whether the stream is currently enabled. Records on the event
//! stream are additionally routed by their [`EventType`] to per-type
//! handlers. Unknown event types have no per-type handler, but a handler
//! registered for the whole event stream still receives them.
//!
//! Delivery rules:
//!
//! - a record is delivered only if its stream has a handler (or, for the
//!   event stream, a matching event handler) **and** the stream is active;
//! - handlers run on the ingestion task, outside the table lock, so a
//!   handler may register or unregister handlers itself;
//! - records of one stream are delivered in the order they were received;
//! - each rate or event-family request bumps a generation counter, and an
//!   acknowledgement is applied only if no newer request has been made for
//!   the same stream or family.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use gazelib_core::{DataRecord, EventControl, EventRecord, EventType, StreamId};

use crate::commands::lock;

/// Handler for all records of one stream.
pub type StreamHandler = Arc<dyn Fn(DataRecord) + Send + Sync + 'static>;

/// Handler for one event type on the event stream.
pub type EventHandler = Arc<dyn Fn(&EventRecord) + Send + Sync + 'static>;

#[derive(Default)]
struct Subscription {
    handler: Option<StreamHandler>,
    rate_hz: f32,
    active: bool,
    generation: u64,
}

#[derive(Default)]
struct Table {
    streams: HashMap<StreamId, Subscription>,
    event_handlers: HashMap<EventType, EventHandler>,
    enabled_events: HashSet<EventControl>,
    event_generations: HashMap<EventControl, u64>,
}

impl Table {
    fn subscription(&mut self, stream: StreamId) -> &mut Subscription {
        self.streams.entry(stream).or_default()
    }

    /// The event stream runs while it has a rate or any event family is on.
    fn refresh_events_active(&mut self) {
        let enabled = !self.enabled_events.is_empty();
        let sub = self.subscription(StreamId::Events);
        sub.active = sub.rate_hz > 0.0 || enabled;
    }
}

/// Stream registry and event router.
#[derive(Default)]
pub(crate) struct Dispatcher {
    table: Mutex<Table>,
    decode_errors: AtomicU64,
    undelivered: AtomicU64,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_stream_handler<F>(&self, stream: StreamId, handler: F)
    where
        F: Fn(DataRecord) + Send + Sync + 'static,
    {
        let handler: StreamHandler = Arc::new(handler);
        lock(&self.table).subscription(stream).handler = Some(handler);
        tracing::debug!(stream = %stream, "Registered stream handler");
    }

    pub(crate) fn unregister_stream_handler(&self, stream: StreamId) -> bool {
        let removed = lock(&self.table).subscription(stream).handler.take().is_some();
        if removed {
            tracing::debug!(stream = %stream, "Unregistered stream handler");
        }
        removed
    }

    pub(crate) fn register_event_handler<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        lock(&self.table).event_handlers.insert(event_type, handler);
        tracing::debug!(event = %event_type, "Registered event handler");
    }

    /// Note a new rate request for a stream and return its generation. A
    /// rate of 0 stops delivery immediately, ahead of the service's ack.
    pub(crate) fn request_stream_rate(&self, stream: StreamId, rate_hz: f32) -> u64 {
        let mut table = lock(&self.table);
        let sub = table.subscription(stream);
        sub.generation += 1;
        let generation = sub.generation;
        if rate_hz == 0.0 {
            sub.rate_hz = 0.0;
            sub.active = false;
            if stream == StreamId::Events {
                table.refresh_events_active();
            }
        }
        generation
    }

    /// Apply a rate the service accepted. Ignored when a newer request for
    /// the stream has been made since; returns whether it was applied.
    pub(crate) fn accept_stream_rate(
        &self,
        stream: StreamId,
        rate_hz: f32,
        generation: u64,
    ) -> bool {
        let mut table = lock(&self.table);
        let sub = table.subscription(stream);
        if sub.generation != generation {
            tracing::trace!(stream = %stream, rate_hz = rate_hz, "Superseded rate ack ignored");
            return false;
        }
        sub.rate_hz = rate_hz;
        sub.active = rate_hz > 0.0;
        if stream == StreamId::Events {
            table.refresh_events_active();
        }
        tracing::debug!(stream = %stream, rate_hz = rate_hz, "Stream rate updated");
        true
    }

    /// Note a new enable/disable request for an event family and return its
    /// generation. Disabling takes effect immediately.
    pub(crate) fn request_event_enabled(&self, control: EventControl, enabled: bool) -> u64 {
        let mut table = lock(&self.table);
        let counter = table.event_generations.entry(control).or_default();
        *counter += 1;
        let generation = *counter;
        if !enabled {
            table.enabled_events.remove(&control);
            table.refresh_events_active();
        }
        generation
    }

    /// Apply an event-family change the service accepted, unless superseded.
    pub(crate) fn accept_event_enabled(
        &self,
        control: EventControl,
        enabled: bool,
        generation: u64,
    ) -> bool {
        let mut table = lock(&self.table);
        if table.event_generations.get(&control).copied() != Some(generation) {
            tracing::trace!(control = ?control, enabled, "Superseded event control ack ignored");
            return false;
        }
        if enabled {
            table.enabled_events.insert(control);
        } else {
            table.enabled_events.remove(&control);
        }
        table.refresh_events_active();
        true
    }

    /// Deactivate every stream. Handlers stay registered so that a later
    /// connection can re-enable them.
    pub(crate) fn deactivate_all(&self) {
        let mut table = lock(&self.table);
        for sub in table.streams.values_mut() {
            sub.rate_hz = 0.0;
            sub.active = false;
        }
        table.enabled_events.clear();
    }

    pub(crate) fn is_active(&self, stream: StreamId) -> bool {
        lock(&self.table)
            .streams
            .get(&stream)
            .is_some_and(|sub| sub.active)
    }

    pub(crate) fn rate(&self, stream: StreamId) -> f32 {
        lock(&self.table)
            .streams
            .get(&stream)
            .map_or(0.0, |sub| sub.rate_hz)
    }

    /// Deliver one decoded record. Returns `true` if any handler ran.
    pub(crate) fn dispatch(&self, record: DataRecord) -> bool {
        let stream = record.stream_id();
        let (stream_handler, event_handler) = {
            let table = lock(&self.table);
            let Some(sub) = table.streams.get(&stream).filter(|sub| sub.active) else {
                self.undelivered.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(stream = %stream, "Record for inactive stream dropped");
                return false;
            };
            let event_handler = match &record {
                DataRecord::Event(event) => table.event_handlers.get(&event.event_type).cloned(),
                DataRecord::Gaze(_) => None,
            };
            (sub.handler.clone(), event_handler)
        };

        let mut delivered = false;
        if let DataRecord::Event(event) = &record {
            match event_handler {
                Some(handler) => {
                    handler(event);
                    delivered = true;
                }
                None if !event.event_type.is_known() => {
                    tracing::trace!(event = %event.event_type, "Ignoring unknown event type");
                }
                None => {}
            }
        }
        if let Some(handler) = stream_handler {
            handler(record);
            delivered = true;
        }
        if !delivered {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }
}
