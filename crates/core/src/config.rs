use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::duration::{normalize_cron, parse_duration};
use crate::error::HeliosError;
use crate::events::SunEventType;
use crate::health::DEFAULT_HISTORY_CAPACITY;
use crate::retry::RetryPolicy;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Load a specific env file. A missing file is reported, not fatal.
pub fn load_env_file(path: &std::path::Path) -> bool {
    dotenvy::from_path(path).is_ok()
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Profiled view over a key lookup: tries {PROFILE}_{KEY} first, falls back to {KEY}.
struct ProfiledEnv<'a> {
    profile: &'a str,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl ProfiledEnv<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, HeliosError> {
        match self.opt(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| HeliosError::Config(format!("{key}: cannot parse '{raw}'"))),
        }
    }

    fn duration(&self, key: &str, default: &str) -> Result<Duration, HeliosError> {
        let raw = self.or(key, default);
        parse_duration(&raw)
            .ok_or_else(|| HeliosError::Config(format!("{key}: invalid duration '{raw}'")))
    }

    fn time(&self, key: &str, default: &str) -> Result<NaiveTime, HeliosError> {
        let raw = self.or(key, default);
        NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M"))
            .map_err(|_| HeliosError::Config(format!("{key}: invalid time of day '{raw}'")))
    }

    fn retry(
        &self,
        prefix: &str,
        attempts: u32,
        backoff: &str,
        timeout: Duration,
    ) -> Result<RetryPolicy, HeliosError> {
        let attempts = self.parse(&format!("{prefix}_RETRY_ATTEMPTS"), attempts)?;
        if attempts == 0 {
            return Err(HeliosError::Config(format!("{prefix}_RETRY_ATTEMPTS must be at least 1")));
        }
        let backoff = self.duration(&format!("{prefix}_RETRY_BACKOFF"), backoff)?;
        Ok(RetryPolicy::new(attempts, backoff).with_timeout(timeout))
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub location: LocationConfig,
    pub weather: WeatherConfig,
    pub owm: OwmConfig,
    pub sun: SunConfig,
    pub timers: TimersConfig,
    pub common: CommonConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &["LOCATION_CITY", "LOCATION_LATITUDE", "OWM_API_KEY"];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `HELIOS_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, HeliosError> {
        let profile = env_opt("HELIOS_PROFILE").unwrap_or_default();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, HeliosError> {
        Self::from_lookup(profile, &env_opt)
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(
        profile: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, HeliosError> {
        let p = profile.to_uppercase();
        let env = ProfiledEnv { profile: &p, lookup };
        let common = CommonConfig::from_env_profiled(&env)?;
        Ok(Self {
            profile: p.clone(),
            location: LocationConfig::from_env_profiled(&env)?,
            weather: WeatherConfig::from_env_profiled(&env, common.request_timeout)?,
            owm: OwmConfig::from_env_profiled(&env)?,
            sun: SunConfig::from_env_profiled(&env, common.request_timeout)?,
            timers: TimersConfig::from_env_profiled(&env, common.request_timeout)?,
            common,
        })
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        let mut profiles = std::collections::BTreeSet::new();
        profiles.insert("default".to_string());

        for (key, _) in env::vars() {
            for marker in PROFILE_MARKER_KEYS {
                if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                    if !prefix.is_empty()
                        && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    {
                        profiles.insert(prefix.to_string());
                    }
                }
            }
        }

        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  location:  city={}, lat={}, lon={}, geoip={}",
            self.location.city,
            self.location.latitude,
            self.location.longitude,
            self.location.geoip
        );
        tracing::info!(
            "  weather:   interval={:?}, deadline={:?}, attempts={}",
            self.weather.check_interval,
            self.weather.observation_deadline,
            self.weather.retry.attempts
        );
        tracing::info!(
            "  owm:       url={}, units={}, configured={}",
            self.owm.base_url, self.owm.units, self.owm.is_configured()
        );
        tracing::info!(
            "  sun:       url={}, cache_days={}, cron='{}'",
            self.sun.base_url, self.sun.cache_days, self.sun.cache_cron
        );
        tracing::info!("  timers:    attempts={}", self.timers.retry.attempts);
        tracing::info!(
            "  common:    timeout={:?}, health_history={}, on_startup={}",
            self.common.request_timeout,
            self.common.health_history,
            self.common.processing_on_startup
        );
    }

    /// Return a redacted view safe for printing (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        let fallback: BTreeMap<String, String> = self
            .sun
            .fallback
            .iter()
            .map(|(event, time)| (event.to_string(), time.format("%H:%M:%S").to_string()))
            .collect();
        serde_json::json!({
            "profile": self.profile_label(),
            "location": {
                "city": self.location.city,
                "latitude": self.location.latitude,
                "longitude": self.location.longitude,
                "geoip": self.location.geoip,
                "geoip_url": self.location.geoip_url,
            },
            "weather": {
                "check_interval_ms": self.weather.check_interval.as_millis() as u64,
                "observation_deadline_ms": self.weather.observation_deadline.as_millis() as u64,
                "retry_attempts": self.weather.retry.attempts,
            },
            "owm": {
                "base_url": self.owm.base_url,
                "units": self.owm.units,
                "language": self.owm.language,
                "cache_ttl_ms": self.owm.cache_ttl.as_millis() as u64,
                "configured": self.owm.is_configured(),
            },
            "sun": {
                "base_url": self.sun.base_url,
                "cache_days": self.sun.cache_days,
                "cache_cron": self.sun.cache_cron,
                "fallback": fallback,
                "retry_attempts": self.sun.retry.attempts,
            },
            "timers": { "retry_attempts": self.timers.retry.attempts },
            "common": {
                "request_timeout_ms": self.common.request_timeout.as_millis() as u64,
                "health_history": self.common.health_history,
                "processing_on_startup": self.common.processing_on_startup,
            },
        })
    }
}

// ── Location ──────────────────────────────────────────────────

/// Configured location. With `geoip` set it is only used when the lookup at
/// start-up fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub geoip: bool,
    /// IP geolocation endpoint answering with `city`, `lat` and `lon` JSON fields.
    pub geoip_url: String,
}

impl LocationConfig {
    fn from_env_profiled(env: &ProfiledEnv<'_>) -> Result<Self, HeliosError> {
        let latitude: f64 = env.parse("LOCATION_LATITUDE", 52.2297)?;
        let longitude: f64 = env.parse("LOCATION_LONGITUDE", 21.0122)?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(HeliosError::Config(format!(
                "location out of range: lat={latitude}, lon={longitude}"
            )));
        }
        Ok(Self {
            city: env.or("LOCATION_CITY", "unknown city"),
            latitude,
            longitude,
            geoip: env.parse("LOCATION_GEOIP", false)?,
            geoip_url: env.or("GEOIP_URL", "http://ip-api.com/json"),
        })
    }
}

// ── Weather ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Delay between two polling cycles.
    pub check_interval: Duration,
    /// Observations older than this are stale.
    pub observation_deadline: Duration,
    pub retry: RetryPolicy,
}

impl WeatherConfig {
    fn from_env_profiled(env: &ProfiledEnv<'_>, timeout: Duration) -> Result<Self, HeliosError> {
        Ok(Self {
            check_interval: env.duration("WEATHER_CHECK_INTERVAL", "1m")?,
            observation_deadline: env.duration("WEATHER_OBSERVATION_DEADLINE", "15m")?,
            retry: env.retry("WEATHER", 3, "2s", timeout)?,
        })
    }
}

// ── OpenWeatherMap ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// "metric", "imperial" or "standard"
    pub units: String,
    pub language: String,
    pub cache_ttl: Duration,
}

impl OwmConfig {
    fn from_env_profiled(env: &ProfiledEnv<'_>) -> Result<Self, HeliosError> {
        let units = env.or("OWM_UNITS", "metric").to_lowercase();
        if !matches!(units.as_str(), "metric" | "imperial" | "standard") {
            return Err(HeliosError::Config(format!("OWM_UNITS: unsupported units '{units}'")));
        }
        Ok(Self {
            base_url: env.or("OWM_BASE_URL", "http://api.openweathermap.org/data/2.5"),
            api_key: env.opt("OWM_API_KEY"),
            units,
            language: env.or("OWM_LANGUAGE", "pl"),
            cache_ttl: env.duration("OWM_CACHE_TTL", "15m")?,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

// ── Sun ephemeris ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SunConfig {
    pub base_url: String,
    /// Number of days kept in the ephemeris cache, starting today.
    pub cache_days: u32,
    /// 6-field cron expression of the daily cache refresh.
    pub cache_cron: String,
    /// Times used when no source can provide the ephemeris.
    pub fallback: BTreeMap<SunEventType, NaiveTime>,
    pub retry: RetryPolicy,
}

impl SunConfig {
    fn from_env_profiled(env: &ProfiledEnv<'_>, timeout: Duration) -> Result<Self, HeliosError> {
        let cache_days = env.parse("SUN_CACHE_DAYS", 7u32)?;
        if cache_days == 0 {
            return Err(HeliosError::Config("SUN_CACHE_DAYS must be at least 1".into()));
        }

        let cache_cron = normalize_cron(&env.or("SUN_CACHE_CRON", "0 0 * * *"));
        cron::Schedule::from_str(&cache_cron)
            .map_err(|e| {
                HeliosError::Config(format!("SUN_CACHE_CRON: invalid cron '{cache_cron}': {e}"))
            })?;

        let fallback = BTreeMap::from([
            (SunEventType::Dawn, env.time("SUN_FALLBACK_DAWN", "05:00:00")?),
            (SunEventType::Sunrise, env.time("SUN_FALLBACK_SUNRISE", "06:00:00")?),
            (SunEventType::Noon, env.time("SUN_FALLBACK_NOON", "12:00:00")?),
            (SunEventType::Sunset, env.time("SUN_FALLBACK_SUNSET", "21:00:00")?),
            (SunEventType::Dusk, env.time("SUN_FALLBACK_DUSK", "22:00:00")?),
        ]);

        Ok(Self {
            base_url: env.or("SUNAPI_BASE_URL", "https://api.sunrise-sunset.org"),
            cache_days,
            cache_cron,
            fallback,
            retry: env.retry("SUN", 3, "5s", timeout)?,
        })
    }
}

// ── Timers ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimersConfig {
    /// Policy of the timer re-fetch performed on every firing.
    pub retry: RetryPolicy,
}

impl TimersConfig {
    fn from_env_profiled(env: &ProfiledEnv<'_>, timeout: Duration) -> Result<Self, HeliosError> {
        Ok(Self {
            retry: env.retry("TIMERS", 3, "1s", timeout)?,
        })
    }
}

// ── Common ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    /// Upper bound of one call to an external collaborator.
    pub request_timeout: Duration,
    /// Recent attempts kept per health tracker.
    pub health_history: usize,
    /// Fill the ephemeris cache and check the weather as soon as the loops
    /// start. When false both wait for their first regular run.
    pub processing_on_startup: bool,
}

impl CommonConfig {
    fn from_env_profiled(env: &ProfiledEnv<'_>) -> Result<Self, HeliosError> {
        let health_history = env.parse("HEALTH_HISTORY", DEFAULT_HISTORY_CAPACITY)?;
        if health_history == 0 {
            return Err(HeliosError::Config("HEALTH_HISTORY must be at least 1".into()));
        }
        Ok(Self {
            request_timeout: env.duration("REQUEST_TIMEOUT", "10s")?,
            health_history,
            processing_on_startup: env.parse("PROCESSING_ON_STARTUP", true)?,
        })
    }
}
