//! Weather observations: sources, merge and the freshness publisher.

pub mod publisher;
pub mod source;

pub use helios_core::weather as model;
pub use helios_core::weather::{Speed, SpeedUnit, Temperature, TemperatureUnit, Weather, Wind};
pub use publisher::{PublisherSettings, WeatherPublisher};
pub use source::{OwmSource, OwmUnits, WeatherSource};
