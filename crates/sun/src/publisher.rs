//! Publishes each sun transition as it happens.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Days;
use helios_core::{Clock, EventStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::model::SunEphemerisEvent;
use crate::provider::EphemerisProvider;

/// Delay before looking again when no upcoming transition is known.
const RETRY_WHEN_UNKNOWN: Duration = Duration::from_secs(3600);

/// Chains sun events: after publishing one transition it arms the next one,
/// searching today's ephemeris first and tomorrow's when today is over.
pub struct SunEventPublisher {
    provider: Arc<EphemerisProvider>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<SunEphemerisEvent>>,
}

impl SunEventPublisher {
    pub fn new(
        provider: Arc<EphemerisProvider>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            events,
            clock,
            last: Mutex::new(None),
        }
    }

    pub fn last_published(&self) -> Option<SunEphemerisEvent> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First transition after the last published one (or after now, before the
    /// first publication).
    ///
    /// A transition of the same day as the last published one is only eligible
    /// if it comes later in the day's order, so a fallback replaced by real
    /// times never repeats a transition.
    pub async fn next_event(&self) -> Option<SunEphemerisEvent> {
        let last = self.last_published();
        let reference = last.map(|e| e.instant).unwrap_or_else(|| self.clock.now());
        let last_day = last.map(|e| (self.clock.to_local(e.instant).date(), e.event_type));
        let today = self.clock.today();

        for day in [today, today + Days::new(1)] {
            let ephemeris = self.provider.ephemeris_for(day).await;
            let next = ephemeris
                .events(self.clock.as_ref())
                .into_iter()
                .filter(|e| e.instant > reference)
                .find(|e| match last_day {
                    Some((published_day, published_type)) if published_day == day => {
                        e.event_type > published_type
                    }
                    _ => true,
                });
            if next.is_some() {
                return next;
            }
        }
        None
    }

    /// Publish transitions until `shutdown` turns true. Transitions already in
    /// the past are published immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting sun events");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = self.next_event().await;
            let delay = match next {
                Some(event) => {
                    let delay = self.clock.duration_until(event.instant);
                    let secs = delay.as_secs();
                    debug!(
                        "Next event will be {} in {}h {}min {}s",
                        event.event_type,
                        secs / 3600,
                        secs % 3600 / 60,
                        secs % 60
                    );
                    delay
                }
                None => {
                    warn!("No upcoming sun transition known, checking again later");
                    RETRY_WHEN_UNKNOWN
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Some(event) = next {
                        info!("Publishing {} event", event.event_type);
                        self.events.publish(event.to_event());
                        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(event);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Sun events stopped");
    }
}
