//! Sun ephemeris: sources, per-day cache and the transition publisher.

pub mod model;
pub mod provider;
pub mod publisher;
pub mod source;

pub use model::{SunEphemeris, SunEphemerisEvent, SunEventType};
pub use provider::{EphemerisProvider, ProviderSettings};
pub use publisher::SunEventPublisher;
pub use source::{EphemerisSource, SunApiSource};
