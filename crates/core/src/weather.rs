//! Weather observation value types.
//!
//! A [`Weather`] is built from partial observations contributed by one or more
//! sources. Every business field is optional so that partials can be merged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HeliosError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TemperatureUnit {
    pub fn symbol(&self) -> char {
        match self {
            TemperatureUnit::Celsius => 'C',
            TemperatureUnit::Fahrenheit => 'F',
            TemperatureUnit::Kelvin => 'K',
        }
    }

    /// Look up a unit by its upper-case symbol.
    pub fn of_symbol(symbol: char) -> Result<Self, HeliosError> {
        [Self::Celsius, Self::Fahrenheit, Self::Kelvin]
            .into_iter()
            .find(|unit| unit.symbol() == symbol)
            .ok_or_else(|| {
                HeliosError::InvalidArgument(format!("Temperature unit '{symbol}' is not supported"))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedUnit {
    KilometersPerHour,
    MetersPerSecond,
    MilesPerHour,
}

impl SpeedUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            SpeedUnit::KilometersPerHour => "km/h",
            SpeedUnit::MetersPerSecond => "m/s",
            SpeedUnit::MilesPerHour => "mph",
        }
    }

    pub fn of_symbol(symbol: &str) -> Result<Self, HeliosError> {
        [Self::KilometersPerHour, Self::MetersPerSecond, Self::MilesPerHour]
            .into_iter()
            .find(|unit| unit.symbol() == symbol)
            .ok_or_else(|| {
                HeliosError::InvalidArgument(format!("Speed unit '{symbol}' is not supported"))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub value: f64,
    pub unit: TemperatureUnit,
}

impl Temperature {
    pub fn new(value: f64, unit: TemperatureUnit) -> Self {
        Self { value, unit }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speed {
    pub value: f64,
    pub unit: SpeedUnit,
}

impl Speed {
    pub fn new(value: f64, unit: SpeedUnit) -> Result<Self, HeliosError> {
        if value < 0.0 || !value.is_finite() {
            return Err(HeliosError::InvalidArgument(format!(
                "speed must be a non-negative number, got {value}"
            )));
        }
        Ok(Self { value, unit })
    }
}

/// Wind vector. Direction is in degrees, 0..=359.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Wind {
    pub speed: Option<Speed>,
    pub direction: Option<u16>,
}

impl Wind {
    pub fn new(speed: Option<Speed>, direction: Option<u16>) -> Result<Self, HeliosError> {
        if let Some(degrees) = direction {
            if degrees > 359 {
                return Err(HeliosError::InvalidArgument(format!(
                    "wind direction must be within 0..=359, got {degrees}"
                )));
            }
        }
        Ok(Self { speed, direction })
    }

    fn merge(&mut self, other: &Wind) {
        if other.speed.is_some() {
            self.speed = other.speed;
        }
        if other.direction.is_some() {
            self.direction = other.direction;
        }
    }
}

/// Weather conditions outside, possibly assembled from several sources.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Weather {
    /// Identifiers of the sources that contributed to this observation.
    pub sources: Vec<String>,
    /// Observation time as reported by the (last contributing) source.
    pub timestamp: Option<DateTime<Utc>>,
    pub temperature: Option<Temperature>,
    pub wind: Option<Wind>,
    /// Cloud coverage percentage: 0 for a clear sky, 100 for full overcast.
    pub clouds_coverage: Option<u8>,
}

impl Weather {
    /// Empty observation attributed to a single source.
    pub fn from_source(source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sources: vec![source.into()],
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: Temperature) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_wind(mut self, wind: Wind) -> Self {
        self.wind = Some(wind);
        self
    }

    pub fn with_clouds(mut self, coverage: u8) -> Result<Self, HeliosError> {
        if coverage > 100 {
            return Err(HeliosError::InvalidArgument(format!(
                "clouds coverage must be within 0..=100, got {coverage}"
            )));
        }
        self.clouds_coverage = Some(coverage);
        Ok(self)
    }

    /// At least one source contributed.
    pub fn is_provided(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Apply `other` on top of `self`, field by field. Fields present in `other`
    /// overwrite; fields it lacks are kept.
    pub fn merge(&mut self, other: &Weather) {
        for source in &other.sources {
            if !self.sources.contains(source) {
                self.sources.push(source.clone());
            }
        }
        if other.timestamp.is_some() {
            self.timestamp = other.timestamp;
        }
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        match (&mut self.wind, &other.wind) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.wind = Some(*theirs),
            _ => {}
        }
        if other.clouds_coverage.is_some() {
            self.clouds_coverage = other.clouds_coverage;
        }
    }

    /// Compare business fields only; the timestamp and contributing sources
    /// are ignored.
    pub fn is_different_than(&self, other: Option<&Weather>) -> bool {
        match other {
            None => true,
            Some(other) => {
                self.temperature != other.temperature
                    || self.wind != other.wind
                    || self.clouds_coverage != other.clouds_coverage
            }
        }
    }

    pub fn is_older_than(&self, deadline: DateTime<Utc>) -> bool {
        self.timestamp.map_or(true, |ts| ts < deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, min, 0).unwrap()
    }

    fn celsius(value: f64) -> Temperature {
        Temperature::new(value, TemperatureUnit::Celsius)
    }

    #[test]
    fn unit_symbols() {
        assert_eq!(TemperatureUnit::of_symbol('K').unwrap(), TemperatureUnit::Kelvin);
        assert!(TemperatureUnit::of_symbol('c').is_err());
        assert_eq!(SpeedUnit::of_symbol("m/s").unwrap(), SpeedUnit::MetersPerSecond);
        assert!(SpeedUnit::of_symbol("kn").is_err());
    }

    #[test]
    fn range_checks() {
        assert!(Wind::new(None, Some(360)).is_err());
        assert!(Wind::new(None, Some(359)).is_ok());
        assert!(Speed::new(-1.0, SpeedUnit::MetersPerSecond).is_err());
        assert!(Weather::default().with_clouds(101).is_err());
    }

    #[test]
    fn merge_keeps_one_sided_fields() {
        let mut a = Weather::from_source("a", ts(0)).with_temperature(celsius(20.0));
        let b = Weather::from_source("b", ts(1)).with_clouds(40).unwrap();
        a.merge(&b);

        assert_eq!(a.sources, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(a.temperature, Some(celsius(20.0)));
        assert_eq!(a.clouds_coverage, Some(40));
        assert_eq!(a.timestamp, Some(ts(1)));
    }

    #[test]
    fn merge_last_applied_wins() {
        let mut merged = Weather::default();
        merged.merge(&Weather::from_source("a", ts(0)).with_temperature(celsius(20.0)));
        merged.merge(&Weather::from_source("b", ts(0)).with_temperature(celsius(22.5)));
        assert_eq!(merged.temperature, Some(celsius(22.5)));

        let mut reversed = Weather::default();
        reversed.merge(&Weather::from_source("b", ts(0)).with_temperature(celsius(22.5)));
        reversed.merge(&Weather::from_source("a", ts(0)).with_temperature(celsius(20.0)));
        assert_eq!(reversed.temperature, Some(celsius(20.0)));
    }

    #[test]
    fn merge_wind_is_nested() {
        let speed = Speed::new(3.5, SpeedUnit::MetersPerSecond).unwrap();
        let mut a = Weather::from_source("a", ts(0)).with_wind(Wind::new(Some(speed), None).unwrap());
        let b = Weather::from_source("b", ts(0)).with_wind(Wind::new(None, Some(270)).unwrap());
        a.merge(&b);
        assert_eq!(a.wind, Some(Wind { speed: Some(speed), direction: Some(270) }));
    }

    #[test]
    fn merge_into_empty_is_provided() {
        let mut merged = Weather::default();
        assert!(!merged.is_provided());
        merged.merge(&Weather::from_source("a", ts(0)));
        assert!(merged.is_provided());
    }

    #[test]
    fn difference_ignores_timestamp() {
        let a = Weather::from_source("a", ts(0)).with_temperature(celsius(20.0));
        let b = Weather::from_source("b", ts(30)).with_temperature(celsius(20.0));
        assert!(!a.is_different_than(Some(&b)));
        assert!(a.is_different_than(None));

        let c = b.clone().with_clouds(10).unwrap();
        assert!(a.is_different_than(Some(&c)));
    }
}
