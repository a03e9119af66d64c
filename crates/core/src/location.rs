use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LocationConfig;
use crate::error::SourceError;

/// Geographical location of the installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Source of the installation's location. The location is assumed stable for
/// the process lifetime.
pub trait LocationProvider: Send + Sync {
    fn locate(&self) -> Location;
}

/// Location taken from configuration, resolved once at construction.
#[derive(Debug, Clone)]
pub struct StaticLocationProvider {
    location: Location,
}

impl StaticLocationProvider {
    pub fn new(location: Location) -> Self {
        info!(
            "Static location is {} (lat={}, lon={})",
            location.city, location.latitude, location.longitude
        );
        Self { location }
    }

    pub fn from_config(config: &LocationConfig) -> Self {
        Self::new(configured(config))
    }
}

impl LocationProvider for StaticLocationProvider {
    fn locate(&self) -> Location {
        self.location.clone()
    }
}

fn configured(config: &LocationConfig) -> Location {
    Location {
        city: config.city.clone(),
        latitude: config.latitude,
        longitude: config.longitude,
    }
}

/// Answer of the IP geolocation endpoint (ip-api.com layout).
#[derive(Debug, Deserialize)]
struct IpLookup {
    status: Option<String>,
    message: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    timezone: Option<String>,
}

/// Location of the machine's public IP, looked up once at start-up.
#[derive(Debug, Clone)]
pub struct GeoIpLocationProvider {
    location: Location,
}

impl GeoIpLocationProvider {
    /// Look up the location at `config.geoip_url`. Any failure falls back to
    /// the configured location.
    pub async fn resolve(config: &LocationConfig, timeout: Duration) -> Self {
        let location = match Self::lookup(&config.geoip_url, timeout).await {
            Ok(location) => {
                info!(
                    "IP based location is {} (lat={}, lon={})",
                    location.city, location.latitude, location.longitude
                );
                location
            }
            Err(e) => {
                warn!("IP based location lookup failed, using configured location: {}", e);
                configured(config)
            }
        };
        Self { location }
    }

    async fn lookup(url: &str, timeout: Duration) -> Result<Location, SourceError> {
        let body: serde_json::Value = reqwest::Client::new()
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, timeout))?
            .error_for_status()
            .map_err(|e| SourceError::from_reqwest(e, timeout))?
            .json()
            .await
            .map_err(|e| SourceError::from_reqwest(e, timeout))?;
        parse_lookup(body)
    }
}

impl LocationProvider for GeoIpLocationProvider {
    fn locate(&self) -> Location {
        self.location.clone()
    }
}

fn parse_lookup(body: serde_json::Value) -> Result<Location, SourceError> {
    let lookup: IpLookup =
        serde_json::from_value(body).map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
    if lookup.status.as_deref().is_some_and(|status| status != "success") {
        let reason = lookup.message.unwrap_or_else(|| "lookup failed".to_string());
        return Err(SourceError::InvalidResponse(reason));
    }
    let (Some(latitude), Some(longitude)) = (lookup.lat, lookup.lon) else {
        return Err(SourceError::InvalidResponse("coordinates missing".into()));
    };
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(SourceError::InvalidResponse(format!(
            "coordinates out of range: lat={latitude}, lon={longitude}"
        )));
    }
    if let Some(zone) = &lookup.timezone {
        debug!("IP located time zone is {}", zone);
    }
    Ok(Location {
        city: lookup.city.unwrap_or_else(|| "unknown city".to_string()),
        latitude,
        longitude,
    })
}

/// Provider selected by `config.geoip`.
pub async fn provider_from_config(
    config: &LocationConfig,
    timeout: Duration,
) -> Arc<dyn LocationProvider> {
    if config.geoip {
        Arc::new(GeoIpLocationProvider::resolve(config, timeout).await)
    } else {
        Arc::new(StaticLocationProvider::from_config(config))
    }
}
