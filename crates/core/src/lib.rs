pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod events;
pub mod health;
pub mod location;
pub mod retry;
pub mod weather;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::*;
pub use events::{EventBus, EventStore, HeliosEvent};
pub use health::{HealthRegistry, HealthTracker};
pub use location::{Location, LocationProvider};
pub use retry::RetryPolicy;
