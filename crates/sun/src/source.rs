//! Ephemeris sources.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use helios_core::{Clock, Location, SourceError};
use serde::Deserialize;
use tracing::debug;

use crate::model::{SunEphemeris, SunEventType};

/// External provider of sun ephemerides.
#[async_trait]
pub trait EphemerisSource: Send + Sync {
    /// Identifier used in logs and health reports.
    fn name(&self) -> &str;

    async fn ephemeris_for(
        &self,
        day: NaiveDate,
        location: &Location,
    ) -> Result<SunEphemeris, SourceError>;
}

/// Response of `GET /json?lat=..&lng=..&date=..&formatted=0`.
#[derive(Debug, Deserialize)]
struct SunApiResponse {
    results: Option<SunApiResults>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct SunApiResults {
    sunrise: Option<DateTime<FixedOffset>>,
    sunset: Option<DateTime<FixedOffset>>,
    solar_noon: Option<DateTime<FixedOffset>>,
    civil_twilight_begin: Option<DateTime<FixedOffset>>,
    civil_twilight_end: Option<DateTime<FixedOffset>>,
}

/// sunrise-sunset.org client.
pub struct SunApiSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SunApiSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            clock,
        }
    }

    fn to_ephemeris(&self, response: SunApiResponse) -> Result<SunEphemeris, SourceError> {
        if response.status != "OK" {
            return Err(SourceError::InvalidResponse(format!("status {}", response.status)));
        }
        let results = response
            .results
            .ok_or_else(|| SourceError::InvalidResponse("missing results".into()))?;
        let noon = results
            .solar_noon
            .ok_or_else(|| SourceError::InvalidResponse("missing solar noon".into()))?;

        let local =
            |instant: DateTime<FixedOffset>| self.clock.to_local(instant.with_timezone(&Utc));
        let mut ephemeris = SunEphemeris::new(local(noon).date());
        let transitions = [
            (SunEventType::Dawn, results.civil_twilight_begin),
            (SunEventType::Sunrise, results.sunrise),
            (SunEventType::Noon, results.solar_noon),
            (SunEventType::Sunset, results.sunset),
            (SunEventType::Dusk, results.civil_twilight_end),
        ];
        for (event_type, instant) in transitions {
            if let Some(instant) = instant {
                ephemeris.times.insert(event_type, local(instant).time());
            }
        }
        Ok(ephemeris)
    }
}

#[async_trait]
impl EphemerisSource for SunApiSource {
    fn name(&self) -> &str {
        "sunrise-sunset"
    }

    async fn ephemeris_for(
        &self,
        day: NaiveDate,
        location: &Location,
    ) -> Result<SunEphemeris, SourceError> {
        let url = format!("{}/json", self.base_url);
        debug!(%day, city = %location.city, "requesting sun ephemeris");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lng", location.longitude.to_string()),
                ("date", day.format("%Y-%m-%d").to_string()),
                ("formatted", "0".to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?
            .error_for_status()
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?
            .json::<SunApiResponse>()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?;
        self.to_ephemeris(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use helios_core::clock::FixedClock;

    fn source(offset_hours: i32) -> SunApiSource {
        let clock = FixedClock::new(Utc::now(), FixedOffset::east_opt(offset_hours * 3600).unwrap());
        SunApiSource::new("https://api.sunrise-sunset.org/", Duration::from_secs(5), Arc::new(clock))
    }

    fn parse(json: &str) -> SunApiResponse {
        serde_json::from_str(json).unwrap()
    }

    const WARSAW_JUNE: &str = r#"{
        "results": {
            "sunrise": "2024-06-21T02:14:00+00:00",
            "sunset": "2024-06-21T19:01:00+00:00",
            "solar_noon": "2024-06-21T10:37:30+00:00",
            "day_length": 60420,
            "civil_twilight_begin": "2024-06-21T01:27:00+00:00",
            "civil_twilight_end": "2024-06-21T19:48:00+00:00",
            "nautical_twilight_begin": "2024-06-21T00:13:00+00:00",
            "nautical_twilight_end": "2024-06-21T21:02:00+00:00"
        },
        "status": "OK",
        "tzid": "UTC"
    }"#;

    #[test]
    fn maps_twilight_and_converts_to_local() {
        let ephemeris = source(2).to_ephemeris(parse(WARSAW_JUNE)).unwrap();
        assert_eq!(ephemeris.day, NaiveDate::from_ymd_opt(2024, 6, 21).unwrap());
        assert!(!ephemeris.approximated);
        assert_eq!(ephemeris.times.len(), 5);
        assert_eq!(ephemeris.time_of(SunEventType::Dawn), NaiveTime::from_hms_opt(3, 27, 0));
        assert_eq!(ephemeris.time_of(SunEventType::Noon), NaiveTime::from_hms_opt(12, 37, 30));
        assert_eq!(ephemeris.time_of(SunEventType::Dusk), NaiveTime::from_hms_opt(21, 48, 0));
    }

    #[test]
    fn day_follows_local_solar_noon() {
        // Noon 23:30 UTC is already the next day at UTC+2.
        let response = parse(
            r#"{"results":{"solar_noon":"2024-06-21T23:30:00+00:00"},"status":"OK"}"#,
        );
        let ephemeris = source(2).to_ephemeris(response).unwrap();
        assert_eq!(ephemeris.day, NaiveDate::from_ymd_opt(2024, 6, 22).unwrap());
        assert_eq!(ephemeris.times.len(), 1);
    }

    #[test]
    fn non_ok_status_is_invalid() {
        let response = parse(r#"{"results":null,"status":"INVALID_DATE"}"#);
        assert!(matches!(
            source(0).to_ephemeris(response),
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(source(0).base_url, "https://api.sunrise-sunset.org");
    }
}
