//! Wiring of the scheduling core and its background loops.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use helios_core::{Clock, Config, EventBus, HealthRegistry, LocationProvider, SystemClock};
use helios_core::location::provider_from_config;
use helios_sun::{EphemerisProvider, ProviderSettings, SunApiSource, SunEventPublisher};
use helios_timers::{AlertScheduler, InMemoryTimerRepository, TimerService};
use helios_weather::{OwmSource, PublisherSettings, WeatherPublisher, WeatherSource};

pub struct App {
    bus: Arc<EventBus>,
    health: Arc<HealthRegistry>,
    scheduler: Arc<AlertScheduler>,
    timers: TimerService,
    ephemeris: Arc<EphemerisProvider>,
    sun_events: Arc<SunEventPublisher>,
    weather: Arc<WeatherPublisher>,
    clock: Arc<dyn Clock>,
}

impl App {
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let location: Arc<dyn LocationProvider> =
            provider_from_config(&config.location, config.common.request_timeout).await;
        let bus = Arc::new(EventBus::new());
        let health = Arc::new(HealthRegistry::new(
            config.common.health_history,
            Arc::clone(&clock),
        ));

        let repository = Arc::new(InMemoryTimerRepository::new(Arc::clone(&clock)));
        let scheduler = Arc::new(AlertScheduler::new(
            repository.clone(),
            bus.clone(),
            Arc::clone(&clock),
            config.timers.retry.clone(),
        ));
        let timers = TimerService::new(repository, Arc::clone(&scheduler), bus.clone());

        let sun_source = Arc::new(SunApiSource::new(
            config.sun.base_url.clone(),
            config.common.request_timeout,
            Arc::clone(&clock),
        ));
        let settings = ProviderSettings::from_config(&config.sun, &config.common)
            .context("invalid sun ephemeris settings")?;
        let ephemeris = Arc::new(EphemerisProvider::new(
            sun_source,
            Arc::clone(&location),
            Arc::clone(&clock),
            health.tracker("sunrise-sunset"),
            config.sun.retry.clone(),
            settings,
        ));
        let sun_events = Arc::new(SunEventPublisher::new(
            Arc::clone(&ephemeris),
            bus.clone(),
            Arc::clone(&clock),
        ));

        let mut sources: Vec<Arc<dyn WeatherSource>> = Vec::new();
        let owm = OwmSource::from_config(
            &config.owm,
            config.common.request_timeout,
            location,
            Arc::clone(&clock),
        )
        .context("invalid OpenWeatherMap settings")?;
        match owm {
            Some(owm) => sources.push(Arc::new(owm)),
            None => info!("OWM_API_KEY not set, OpenWeatherMap source disabled"),
        }
        let weather = Arc::new(WeatherPublisher::new(
            sources,
            bus.clone(),
            Arc::clone(&clock),
            Arc::clone(&health),
            PublisherSettings::from_config(&config.weather, &config.common),
        ));

        Ok(Self {
            bus,
            health,
            scheduler,
            timers,
            ephemeris,
            sun_events,
            weather,
            clock,
        })
    }

    /// Start every loop, wait for ctrl-c, then stop.
    pub async fn run(self) -> anyhow::Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut loops: Vec<JoinHandle<()>> = Vec::new();

        loops.push(tokio::spawn(log_events(self.bus.subscribe(), stop_rx.clone())));

        let started = self.scheduler.start_all().await.context("failed to load timers")?;
        info!("Timer alerts armed: {} task(s)", started);
        for (description, next) in self.timers.overview(self.clock.as_ref()).await? {
            match next {
                Some(at) => info!("Timer '{}' next alert at {}", description, at),
                None => info!("Timer '{}' has nothing scheduled", description),
            }
        }

        {
            let ephemeris = Arc::clone(&self.ephemeris);
            let stop = stop_rx.clone();
            loops.push(tokio::spawn(async move { ephemeris.run_cache_refresh(stop).await }));
        }
        {
            let sun_events = Arc::clone(&self.sun_events);
            let stop = stop_rx.clone();
            loops.push(tokio::spawn(async move { sun_events.run(stop).await }));
        }
        {
            let weather = Arc::clone(&self.weather);
            let stop = stop_rx;
            loops.push(tokio::spawn(async move { weather.run(stop).await }));
        }

        info!("Helios is running, press ctrl-c to stop");
        tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
        info!("Shutdown requested");

        let _ = stop_tx.send(true);
        self.scheduler.shutdown();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("background loop ended abnormally: {}", e);
            }
        }

        if let Some(weather) = self.weather.current() {
            info!("Last weather observation: {:?}", weather);
        }
        for snapshot in self.health.snapshot_all() {
            info!(
                "Health {}: {:?}, {} request(s), {:.1}% successful",
                snapshot.name, snapshot.status, snapshot.all_requests, snapshot.success_rate
            );
        }
        Ok(())
    }
}

/// Log every event published on the bus until shutdown.
async fn log_events(
    mut events: broadcast::Receiver<helios_core::events::EventEnvelope>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) => {
                    info!(id = %envelope.id, "Event {}: {:?}", envelope.topic(), envelope.event)
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event log lagging, {} event(s) skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}
