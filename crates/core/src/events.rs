//! Domain events and the in-process event store.
//!
//! Publishers hand events to an [`EventStore`]; the [`EventBus`] implementation
//! fans them out to every subscriber over a tokio broadcast channel. Publishing
//! never waits on subscribers and subscriber failures never reach the publisher.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::weather::Weather;

/// Topic constants, `helios.<domain>.<event>`.
pub mod topics {
    /// A timer schedule reached its time of day.
    pub const TIMER_ALERT: &str = "helios.timer.alert";

    /// A timer was deleted.
    pub const TIMER_REMOVED: &str = "helios.timer.removed";

    /// A new (changed) weather observation is available.
    pub const WEATHER_OBSERVATION: &str = "helios.weather.observation";

    /// No fresh weather observation within the configured deadline.
    pub const WEATHER_STALE: &str = "helios.weather.stale";

    /// A sun ephemeris transition (dawn, sunrise, ...) happened.
    pub const SUN_EPHEMERIS: &str = "helios.sun.ephemeris";
}

/// Sun transitions of a day, in chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunEventType {
    Dawn,
    Sunrise,
    Noon,
    Sunset,
    Dusk,
}

impl SunEventType {
    pub const ALL: [SunEventType; 5] = [
        SunEventType::Dawn,
        SunEventType::Sunrise,
        SunEventType::Noon,
        SunEventType::Sunset,
        SunEventType::Dusk,
    ];
}

impl std::fmt::Display for SunEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SunEventType::Dawn => write!(f, "dawn"),
            SunEventType::Sunrise => write!(f, "sunrise"),
            SunEventType::Noon => write!(f, "noon"),
            SunEventType::Sunset => write!(f, "sunset"),
            SunEventType::Dusk => write!(f, "dusk"),
        }
    }
}

/// Snapshot of the timer an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRef {
    pub id: u64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeliosEvent {
    TimerAlert {
        timer: TimerRef,
    },
    TimerRemoved {
        timer: TimerRef,
    },
    WeatherObservation {
        weather: Weather,
    },
    WeatherStale {
        last_known_weather: Option<Weather>,
    },
    SunEphemeris {
        event_type: SunEventType,
        instant: DateTime<Utc>,
    },
}

impl HeliosEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            HeliosEvent::TimerAlert { .. } => topics::TIMER_ALERT,
            HeliosEvent::TimerRemoved { .. } => topics::TIMER_REMOVED,
            HeliosEvent::WeatherObservation { .. } => topics::WEATHER_OBSERVATION,
            HeliosEvent::WeatherStale { .. } => topics::WEATHER_STALE,
            HeliosEvent::SunEphemeris { .. } => topics::SUN_EPHEMERIS,
        }
    }
}

/// Envelope carried over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub published_at: DateTime<Utc>,
    pub event: HeliosEvent,
}

impl EventEnvelope {
    pub fn new(event: HeliosEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            published_at: Utc::now(),
            event,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.event.topic()
    }
}

/// Fire-and-forget sink for domain events.
pub trait EventStore: Send + Sync {
    /// Publish an event. Must not block beyond enqueueing.
    fn publish(&self, event: HeliosEvent);
}

/// Blanket implementation so `Arc<dyn EventStore>` can be used directly.
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    fn publish(&self, event: HeliosEvent) {
        (**self).publish(event)
    }
}

/// Default capacity of the bus channel; slower subscribers lag past it.
const DEFAULT_BUS_CAPACITY: usize = 256;

/// Multi-subscriber fan-out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for EventBus {
    fn publish(&self, event: HeliosEvent) {
        let envelope = EventEnvelope::new(event);
        let topic = envelope.topic();
        match self.sender.send(envelope) {
            Ok(receivers) => debug!(topic, receivers, "event published"),
            Err(_) => debug!(topic, "event published without subscribers"),
        }
    }
}

/// Event store that keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    events: Mutex<Vec<HeliosEvent>>,
}

impl RecordingEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HeliosEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded events published on `topic`.
    pub fn count(&self, topic: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.topic() == topic)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventStore for RecordingEventStore {
    fn publish(&self, event: HeliosEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
