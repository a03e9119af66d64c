//! Caching ephemeris provider.
//!
//! Ephemerides are fetched from an [`EphemerisSource`] under a retry policy and
//! cached per local day. When the source stays unavailable the configured
//! fallback times are served for the requested day; fallbacks are never cached
//! so the next request tries the source again.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Days, NaiveDate, NaiveTime};
use cron::Schedule;
use helios_core::config::{CommonConfig, SunConfig};
use helios_core::health::HealthTracker;
use helios_core::retry::{with_retry, RetryPolicy};
use helios_core::{Clock, HeliosError, LocationProvider, SourceError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::model::{SunEphemeris, SunEventType};
use crate::source::EphemerisSource;

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Days kept in cache, today included.
    pub cache_days: u32,
    /// Daily refresh schedule, evaluated in local time.
    pub cache_cron: Schedule,
    pub fallback: BTreeMap<SunEventType, NaiveTime>,
    /// Refresh once immediately when the refresh loop starts.
    pub refresh_on_startup: bool,
}

impl ProviderSettings {
    pub fn from_config(sun: &SunConfig, common: &CommonConfig) -> Result<Self, HeliosError> {
        let cache_cron = Schedule::from_str(&sun.cache_cron)
            .map_err(|e| {
                HeliosError::Config(format!("invalid cache cron '{}': {e}", sun.cache_cron))
            })?;
        Ok(Self {
            cache_days: sun.cache_days.max(1),
            cache_cron,
            fallback: sun.fallback.clone(),
            refresh_on_startup: common.processing_on_startup,
        })
    }
}

pub struct EphemerisProvider {
    source: Arc<dyn EphemerisSource>,
    location: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    health: Arc<HealthTracker>,
    policy: RetryPolicy,
    settings: ProviderSettings,
    cache: Mutex<BTreeMap<NaiveDate, SunEphemeris>>,
}

impl EphemerisProvider {
    pub fn new(
        source: Arc<dyn EphemerisSource>,
        location: Arc<dyn LocationProvider>,
        clock: Arc<dyn Clock>,
        health: Arc<HealthTracker>,
        policy: RetryPolicy,
        settings: ProviderSettings,
    ) -> Self {
        Self {
            source,
            location,
            clock,
            health,
            policy,
            settings,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Ephemeris of a local day, from cache, the source, or the fallback.
    pub async fn ephemeris_for(&self, day: NaiveDate) -> SunEphemeris {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&day)
            .cloned();
        if let Some(cached) = cached {
            debug!("Ephemeris for {} is available in cache", day);
            return cached;
        }

        info!("Requesting ephemeris for {}", day);
        let location = self.location.locate();
        with_retry(
            self.source.name(),
            &self.policy,
            || {
                let source = Arc::clone(&self.source);
                let location = location.clone();
                async move {
                    let received = source.ephemeris_for(day, &location).await?;
                    Ok::<_, SourceError>(self.accept(day, received))
                }
            },
            |e| self.fallback(day, e),
        )
        .await
    }

    /// Normalise a fetched ephemeris to `day` and cache it. A concurrent
    /// fetch that cached the day first wins.
    fn accept(&self, day: NaiveDate, mut ephemeris: SunEphemeris) -> SunEphemeris {
        if ephemeris.day != day {
            debug!(requested = %day, received = %ephemeris.day, "ephemeris day adjusted");
            ephemeris.day = day;
        }
        self.health
            .record_success(serde_json::to_value(&ephemeris).unwrap_or_default());
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.entry(day).or_insert(ephemeris).clone()
    }

    fn fallback(&self, day: NaiveDate, e: &SourceError) -> SunEphemeris {
        error!(%day, error = %e, "Ephemeris request failed, providing fallback");
        self.health.record_failure(e);
        SunEphemeris::fallback(day, &self.settings.fallback)
    }

    /// Make sure today and the following days are cached, then drop past days.
    pub async fn refresh_cache(&self) {
        let today = self.clock.today();
        debug!("Caching ephemeris for next {} days", self.settings.cache_days);
        for offset in 0..self.settings.cache_days {
            self.ephemeris_for(today + Days::new(u64::from(offset))).await;
        }
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let before = cache.len();
        cache.retain(|day, _| *day >= today);
        debug!("Removed from cache {} outdated entries", before - cache.len());
    }

    pub fn cached_days(&self) -> Vec<NaiveDate> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Refresh the cache at every tick of the configured cron expression until
    /// `shutdown` turns true.
    pub async fn run_cache_refresh(&self, mut shutdown: watch::Receiver<bool>) {
        if self.settings.refresh_on_startup {
            self.refresh_cache().await;
        }
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = self.clock.now();
            let local_now = now.with_timezone(&self.clock.offset_at(now));
            let Some(tick) = self.settings.cache_cron.after(&local_now).next() else {
                warn!("Ephemeris cache cron has no upcoming tick, refresh stopped");
                return;
            };
            let at = self.clock.resolve_local(tick.naive_local());
            debug!(next_refresh = %at, "ephemeris cache refresh armed");

            tokio::select! {
                _ = tokio::time::sleep(self.clock.duration_until(at)) => self.refresh_cache().await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Ephemeris cache refresh stopped");
    }
}
