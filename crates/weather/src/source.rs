//! Weather sources.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helios_core::config::OwmConfig;
use helios_core::weather::{Speed, SpeedUnit, Temperature, TemperatureUnit, Weather, Wind};
use helios_core::{Clock, HeliosError, LocationProvider, SourceError};
use serde::Deserialize;
use tracing::debug;

/// External provider of current weather conditions.
///
/// Implementations must be safe to call again after a failure; the publisher
/// retries them.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Identifier used in logs, health reports and `Weather::sources`.
    fn name(&self) -> &str;

    /// Current conditions, `None` when the source has nothing to report.
    async fn current_weather(&self) -> Result<Option<Weather>, SourceError>;
}

/// Unit system requested from OpenWeatherMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwmUnits {
    Metric,
    Imperial,
    Standard,
}

impl OwmUnits {
    pub fn parse(units: &str) -> Result<Self, HeliosError> {
        match units.to_lowercase().as_str() {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            "standard" => Ok(Self::Standard),
            other => Err(HeliosError::Config(format!("unsupported OWM units '{other}'"))),
        }
    }

    pub fn as_query(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
            Self::Standard => "standard",
        }
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        match self {
            Self::Metric => TemperatureUnit::Celsius,
            Self::Imperial => TemperatureUnit::Fahrenheit,
            Self::Standard => TemperatureUnit::Kelvin,
        }
    }

    pub fn speed_unit(&self) -> SpeedUnit {
        match self {
            Self::Imperial => SpeedUnit::MilesPerHour,
            Self::Metric | Self::Standard => SpeedUnit::MetersPerSecond,
        }
    }
}

/// Subset of the `GET /weather` response that is used.
#[derive(Debug, Deserialize)]
struct OwmResponse {
    dt: i64,
    main: Option<OwmMain>,
    wind: Option<OwmWind>,
    clouds: Option<OwmClouds>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: Option<f64>,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmClouds {
    all: Option<u8>,
}

struct CachedResponse {
    expires: DateTime<Utc>,
    weather: Weather,
}

/// OpenWeatherMap current weather client.
///
/// Responses are cached for the configured TTL: OWM refreshes its data every
/// ten minutes at most and the free plan is rate limited.
pub struct OwmSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    units: OwmUnits,
    language: String,
    cache_ttl: Duration,
    timeout: Duration,
    location: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedResponse>>,
}

impl OwmSource {
    pub const NAME: &'static str = "owm";

    /// Build a client from configuration. `Ok(None)` when no API key is set.
    pub fn from_config(
        config: &OwmConfig,
        timeout: Duration,
        location: Arc<dyn LocationProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Option<Self>, HeliosError> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            units: OwmUnits::parse(&config.units)?,
            language: config.language.clone(),
            cache_ttl: config.cache_ttl,
            timeout,
            location,
            clock,
            cache: Mutex::new(None),
        }))
    }

    /// Drop the cached response so the next call hits the API.
    pub fn expire_cached_response(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("Cached weather response (if any) expired");
    }

    fn cached(&self) -> Option<Weather> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|entry| entry.expires > self.clock.now())
            .map(|entry| entry.weather.clone())
    }

    fn store(&self, weather: &Weather) {
        let ttl =
            chrono::Duration::from_std(self.cache_ttl).unwrap_or_else(|_| chrono::Duration::zero());
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedResponse {
            expires: self.clock.now() + ttl,
            weather: weather.clone(),
        });
    }

    fn to_weather(&self, response: OwmResponse) -> Result<Weather, SourceError> {
        let invalid = |e: HeliosError| SourceError::InvalidResponse(e.to_string());
        let timestamp = DateTime::from_timestamp(response.dt, 0)
            .ok_or_else(|| SourceError::InvalidResponse(format!("invalid dt {}", response.dt)))?;

        let mut weather = Weather::from_source(Self::NAME, timestamp);
        if let Some(temp) = response.main.and_then(|main| main.temp) {
            let unit = self.units.temperature_unit();
            weather = weather.with_temperature(Temperature::new(temp, unit));
        }
        if let Some(wind) = response.wind {
            let speed = wind
                .speed
                .map(|value| Speed::new(value, self.units.speed_unit()))
                .transpose()
                .map_err(invalid)?;
            let direction = wind.deg.map(|deg| (deg.round() as i64).rem_euclid(360) as u16);
            weather = weather.with_wind(Wind::new(speed, direction).map_err(invalid)?);
        }
        if let Some(coverage) = response.clouds.and_then(|clouds| clouds.all) {
            weather = weather.with_clouds(coverage).map_err(invalid)?;
        }
        Ok(weather)
    }
}

#[async_trait]
impl WeatherSource for OwmSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn current_weather(&self) -> Result<Option<Weather>, SourceError> {
        if let Some(weather) = self.cached() {
            debug!("Current weather served from cache");
            return Ok(Some(weather));
        }

        let location = self.location.locate();
        let response = self
            .client
            .get(format!("{}/weather", self.base_url))
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("units", self.units.as_query().to_string()),
                ("lang", self.language.clone()),
                ("appid", self.api_key.clone()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?
            .error_for_status()
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?
            .json::<OwmResponse>()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?;
        debug!("Current weather response: {:?}", response);

        let weather = self.to_weather(response)?;
        self.store(&weather);
        Ok(Some(weather))
    }
}
