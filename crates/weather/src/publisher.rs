//! Periodic weather check publishing observations when conditions change.
//!
//! Each cycle merges what the configured sources report, in configuration
//! order. A changed, fresh observation is published; when no fresh data is
//! available past the observation deadline a single stale notice is sent,
//! and nothing more until the next observation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use helios_core::config::{CommonConfig, WeatherConfig};
use helios_core::events::HeliosEvent;
use helios_core::health::HealthRegistry;
use helios_core::retry::{retry, RetryPolicy};
use helios_core::weather::Weather;
use helios_core::{Clock, EventStore};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::source::WeatherSource;

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub check_interval: Duration,
    pub observation_deadline: Duration,
    pub retry: RetryPolicy,
    /// Poll as soon as `run` starts instead of one interval later.
    pub poll_on_startup: bool,
}

impl PublisherSettings {
    pub fn from_config(weather: &WeatherConfig, common: &CommonConfig) -> Self {
        Self {
            check_interval: weather.check_interval,
            observation_deadline: weather.observation_deadline,
            retry: weather.retry.clone(),
            poll_on_startup: common.processing_on_startup,
        }
    }
}

#[derive(Debug, Default)]
struct PublisherState {
    /// Latest fresh observation, `None` before the first one and after a
    /// stale notice.
    baseline: Option<Weather>,
    /// Stale notice sent since the last observation.
    stale_notified: bool,
    warned_no_sources: bool,
}

pub struct WeatherPublisher {
    sources: Vec<Arc<dyn WeatherSource>>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    health: Arc<HealthRegistry>,
    settings: PublisherSettings,
    state: Mutex<PublisherState>,
}

impl WeatherPublisher {
    pub fn new(
        sources: Vec<Arc<dyn WeatherSource>>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        health: Arc<HealthRegistry>,
        settings: PublisherSettings,
    ) -> Self {
        Self {
            sources,
            events,
            clock,
            health,
            settings,
            state: Mutex::new(PublisherState::default()),
        }
    }

    /// Last published observation, refreshed while conditions stay the same.
    pub fn current(&self) -> Option<Weather> {
        self.lock().baseline.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PublisherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline(&self) -> DateTime<Utc> {
        let deadline = chrono::Duration::from_std(self.settings.observation_deadline)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.clock.now() - deadline
    }

    /// Query every source and merge the answers. Failed sources contribute
    /// nothing.
    async fn collect(&self) -> Weather {
        let mut merged = Weather::default();
        for source in &self.sources {
            let tracker = self.health.tracker(source.name());
            let result = retry(source.name(), &self.settings.retry, || {
                let source = Arc::clone(source);
                async move { source.current_weather().await }
            })
            .await;
            match result {
                Ok(Some(weather)) => {
                    tracker.record_success(serde_json::to_value(&weather).unwrap_or_default());
                    merged.merge(&weather);
                }
                Ok(None) => {
                    debug!(source = source.name(), "source has no current weather");
                    tracker.record_success(serde_json::Value::Null);
                }
                Err(e) => {
                    error!(source = source.name(), error = %e, "Current weather request failed");
                    tracker.record_failure(&e);
                }
            }
        }
        merged
    }

    /// One check cycle.
    pub async fn poll(&self) {
        if self.sources.is_empty() {
            let mut state = self.lock();
            if !state.warned_no_sources {
                warn!("No weather sources configured, weather checks are skipped");
                state.warned_no_sources = true;
            }
            return;
        }

        let merged = self.collect().await;
        let deadline = self.deadline();
        let fresh = merged.is_provided() && !merged.is_older_than(deadline);

        let event = {
            let mut state = self.lock();
            if fresh {
                let changed = merged.is_different_than(state.baseline.as_ref());
                state.baseline = Some(merged.clone());
                state.stale_notified = false;
                if changed {
                    debug!("Weather has changed. New observation: {:?}", merged);
                    Some(HeliosEvent::WeatherObservation { weather: merged })
                } else {
                    debug!("Weather has not changed");
                    None
                }
            } else if state.stale_notified {
                debug!("Missing weather warning was already sent earlier");
                None
            } else if !merged.is_provided()
                && state.baseline.as_ref().is_some_and(|w| !w.is_older_than(deadline))
            {
                debug!("Weather observation is missing but the deadline has not passed yet");
                None
            } else {
                error!(
                    "Weather observation is missing for {}s",
                    self.settings.observation_deadline.as_secs()
                );
                state.stale_notified = true;
                Some(HeliosEvent::WeatherStale {
                    last_known_weather: state.baseline.take(),
                })
            }
        };

        if let Some(event) = event {
            self.events.publish(event);
        }
    }

    /// Poll with a fixed delay between cycles until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting weather checks every {}s",
            self.settings.check_interval.as_secs()
        );
        let mut poll_now = self.settings.poll_on_startup;
        if !poll_now {
            info!("Start-up processing disabled, first weather check after one interval");
        }
        loop {
            if *shutdown.borrow() {
                break;
            }
            if poll_now {
                self.poll().await;
            }
            poll_now = true;
            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Weather checks stopped");
    }
}
