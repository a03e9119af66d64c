//! Freshness publisher behaviour over sequences of poll cycles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::watch;

use helios_core::clock::TokioClock;
use helios_core::events::{topics, HeliosEvent, RecordingEventStore};
use helios_core::health::{HealthRegistry, HealthStatus};
use helios_core::retry::RetryPolicy;
use helios_core::{Clock, SourceError};
use helios_weather::{PublisherSettings, Temperature, TemperatureUnit, Weather, WeatherPublisher, WeatherSource};

#[derive(Debug, Clone, Copy)]
enum Reply {
    Celsius(f64),
    Clouds(u8),
    /// Reading with a timestamp frozen at the given instant.
    Frozen(f64, DateTime<Utc>),
    Nothing,
    Fail,
}

struct ScriptedSource {
    name: &'static str,
    reply: Mutex<Reply>,
    calls: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl ScriptedSource {
    fn new(name: &'static str, reply: Reply, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Mutex::new(reply),
            calls: AtomicUsize::new(0),
            clock,
        })
    }

    fn reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }
}

#[async_trait]
impl WeatherSource for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn current_weather(&self) -> Result<Option<Weather>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();
        match *self.reply.lock().unwrap() {
            Reply::Celsius(value) => Ok(Some(Weather::from_source(self.name, now).with_temperature(celsius(value)))),
            Reply::Clouds(coverage) => Ok(Some(Weather::from_source(self.name, now).with_clouds(coverage).unwrap())),
            Reply::Frozen(value, at) => Ok(Some(Weather::from_source(self.name, at).with_temperature(celsius(value)))),
            Reply::Nothing => Ok(None),
            Reply::Fail => Err(SourceError::Unavailable("scripted outage".into())),
        }
    }
}

fn celsius(value: f64) -> Temperature {
    Temperature::new(value, TemperatureUnit::Celsius)
}

fn clock() -> Arc<dyn Clock> {
    let start = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap().and_hms_opt(12, 0, 0).unwrap();
    Arc::new(TokioClock::at_local(start))
}

fn settings(poll_on_startup: bool) -> PublisherSettings {
    PublisherSettings {
        check_interval: Duration::from_secs(60),
        observation_deadline: Duration::from_secs(15 * 60),
        retry: RetryPolicy::once(Duration::from_secs(5)),
        poll_on_startup,
    }
}

struct Fixture {
    publisher: Arc<WeatherPublisher>,
    events: Arc<RecordingEventStore>,
    health: Arc<HealthRegistry>,
}

fn fixture(sources: &[&Arc<ScriptedSource>], clock: Arc<dyn Clock>) -> Fixture {
    fixture_with(sources, clock, settings(true))
}

fn fixture_with(
    sources: &[&Arc<ScriptedSource>],
    clock: Arc<dyn Clock>,
    settings: PublisherSettings,
) -> Fixture {
    let sources: Vec<Arc<dyn WeatherSource>> = sources
        .iter()
        .map(|source| Arc::clone(*source) as Arc<dyn WeatherSource>)
        .collect();
    let events = Arc::new(RecordingEventStore::new());
    let health = Arc::new(HealthRegistry::new(10, Arc::clone(&clock)));
    let publisher = Arc::new(WeatherPublisher::new(
        sources,
        events.clone(),
        clock,
        Arc::clone(&health),
        settings,
    ));
    Fixture { publisher, events, health }
}

/// Compact view of the published weather events: `Some(temp)` for an
/// observation, `None` for a stale notice.
fn timeline(events: &RecordingEventStore) -> Vec<Option<f64>> {
    events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            HeliosEvent::WeatherObservation { weather } => Some(Some(weather.temperature.map_or(f64::NAN, |t| t.value))),
            HeliosEvent::WeatherStale { .. } => Some(None),
            _ => None,
        })
        .collect()
}

async fn minutes(count: u64) {
    tokio::time::sleep(Duration::from_secs(count * 60)).await;
}

#[tokio::test(start_paused = true)]
async fn publishes_only_changed_observations() {
    let clock = clock();
    let source = ScriptedSource::new("a", Reply::Celsius(20.0), Arc::clone(&clock));
    let f = fixture(&[&source], clock);

    f.publisher.poll().await;
    minutes(1).await;
    f.publisher.poll().await;
    source.reply(Reply::Celsius(21.5));
    minutes(1).await;
    f.publisher.poll().await;

    assert_eq!(timeline(&f.events), vec![Some(20.0), Some(21.5)]);
    assert_eq!(f.publisher.current().unwrap().temperature, Some(celsius(21.5)));
}

#[tokio::test(start_paused = true)]
async fn outage_is_reported_once_after_deadline() {
    let clock = clock();
    let source = ScriptedSource::new("a", Reply::Celsius(20.0), Arc::clone(&clock));
    let f = fixture(&[&source], clock);

    f.publisher.poll().await;
    source.reply(Reply::Fail);

    // Within the deadline nothing is reported.
    minutes(10).await;
    f.publisher.poll().await;
    assert_eq!(timeline(&f.events), vec![Some(20.0)]);

    minutes(6).await;
    f.publisher.poll().await;
    minutes(1).await;
    f.publisher.poll().await;
    assert_eq!(timeline(&f.events), vec![Some(20.0), None]);
    assert!(f.publisher.current().is_none());

    match f.events.events().last() {
        Some(HeliosEvent::WeatherStale { last_known_weather }) => {
            assert_eq!(last_known_weather.as_ref().unwrap().temperature, Some(celsius(20.0)));
        }
        other => panic!("expected stale notice, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn recovery_after_stale_is_always_published() {
    let clock = clock();
    let source = ScriptedSource::new("a", Reply::Nothing, Arc::clone(&clock));
    let f = fixture(&[&source], clock);

    // Nothing known at start-up is stale right away.
    f.publisher.poll().await;
    source.reply(Reply::Celsius(20.0));
    minutes(1).await;
    f.publisher.poll().await;
    source.reply(Reply::Fail);
    minutes(20).await;
    f.publisher.poll().await;
    source.reply(Reply::Celsius(20.0));
    minutes(1).await;
    f.publisher.poll().await;

    assert_eq!(timeline(&f.events), vec![None, Some(20.0), None, Some(20.0)]);
    assert!(matches!(
        f.events.events().first(),
        Some(HeliosEvent::WeatherStale { last_known_weather: None })
    ));
}

#[tokio::test(start_paused = true)]
async fn old_reading_counts_as_stale() {
    let clock = clock();
    let frozen_at = clock.now() - chrono::Duration::minutes(30);
    let source = ScriptedSource::new("a", Reply::Frozen(18.0, frozen_at), Arc::clone(&clock));
    let f = fixture(&[&source], clock);

    f.publisher.poll().await;
    minutes(1).await;
    f.publisher.poll().await;

    assert_eq!(timeline(&f.events), vec![None]);
}

#[tokio::test(start_paused = true)]
async fn unchanged_readings_keep_observation_fresh() {
    let clock = clock();
    let source = ScriptedSource::new("a", Reply::Celsius(20.0), Arc::clone(&clock));
    let f = fixture(&[&source], clock);

    for _ in 0..20 {
        f.publisher.poll().await;
        minutes(1).await;
    }
    // The source fails after twenty minutes of identical readings: the last
    // confirmation is recent, so nothing is stale yet.
    source.reply(Reply::Fail);
    f.publisher.poll().await;

    assert_eq!(timeline(&f.events), vec![Some(20.0)]);
}

#[tokio::test(start_paused = true)]
async fn sources_are_merged_in_configured_order() {
    let clock = clock();
    let a = ScriptedSource::new("a", Reply::Celsius(20.0), Arc::clone(&clock));
    let b = ScriptedSource::new("b", Reply::Clouds(75), Arc::clone(&clock));
    let c = ScriptedSource::new("c", Reply::Celsius(22.0), Arc::clone(&clock));
    let f = fixture(&[&a, &b, &c], clock);

    f.publisher.poll().await;

    let current = f.publisher.current().unwrap();
    assert_eq!(current.sources, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    assert_eq!(current.temperature, Some(celsius(22.0)));
    assert_eq!(current.clouds_coverage, Some(75));
    assert_eq!(f.events.count(topics::WEATHER_OBSERVATION), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_source_contributes_nothing_and_is_tracked() {
    let clock = clock();
    let good = ScriptedSource::new("good", Reply::Celsius(20.0), Arc::clone(&clock));
    let bad = ScriptedSource::new("bad", Reply::Fail, Arc::clone(&clock));
    let f = fixture(&[&bad, &good], clock);

    f.publisher.poll().await;

    assert_eq!(f.publisher.current().unwrap().sources, vec!["good".to_string()]);
    assert_eq!(f.health.tracker("good").status(), HealthStatus::Up);
    assert_eq!(f.health.tracker("bad").status(), HealthStatus::Down);
    assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn no_sources_publishes_nothing() {
    let f = fixture(&[], clock());
    for _ in 0..3 {
        f.publisher.poll().await;
        minutes(30).await;
    }
    assert!(f.events.is_empty());
}

#[tokio::test(start_paused = true)]
async fn at_most_one_stale_between_observations() {
    let clock = clock();
    let source = ScriptedSource::new("a", Reply::Celsius(20.0), Arc::clone(&clock));
    let f = fixture(&[&source], clock);
    let (stop_tx, stop_rx) = watch::channel(false);

    let runner = {
        let publisher = Arc::clone(&f.publisher);
        tokio::spawn(async move { publisher.run(stop_rx).await })
    };

    // Polls run on whole minutes; replies switch half a minute later.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let script = [
        (Reply::Celsius(20.0), 5),
        (Reply::Fail, 40),
        (Reply::Nothing, 30),
        (Reply::Celsius(19.0), 3),
        (Reply::Celsius(19.5), 3),
        (Reply::Fail, 25),
    ];
    for (reply, duration) in script {
        source.reply(reply);
        minutes(duration).await;
    }
    stop_tx.send(true).unwrap();
    runner.await.unwrap();

    let timeline = timeline(&f.events);
    assert!(timeline.windows(2).all(|pair| !(pair[0].is_none() && pair[1].is_none())));
    assert_eq!(timeline, vec![Some(20.0), None, Some(19.0), Some(19.5), None]);
}

#[tokio::test(start_paused = true)]
async fn first_poll_waits_one_interval_without_startup_processing() {
    let clock = clock();
    let source = ScriptedSource::new("a", Reply::Celsius(20.0), Arc::clone(&clock));
    let f = fixture_with(&[&source], clock, settings(false));
    let (stop_tx, stop_rx) = watch::channel(false);

    let runner = {
        let publisher = Arc::clone(&f.publisher);
        tokio::spawn(async move { publisher.run(stop_rx).await })
    };

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert!(f.events.is_empty());

    minutes(1).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(timeline(&f.events), vec![Some(20.0)]);

    stop_tx.send(true).unwrap();
    runner.await.unwrap();
}
