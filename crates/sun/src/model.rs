use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use helios_core::events::HeliosEvent;
use helios_core::Clock;
use serde::{Deserialize, Serialize};

pub use helios_core::events::SunEventType;

/// Sun transition times of one local day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunEphemeris {
    pub day: NaiveDate,
    /// Local wall times. Transitions that do not happen (polar day or night)
    /// are absent.
    pub times: BTreeMap<SunEventType, NaiveTime>,
    /// Built from configured fallback times instead of a real source.
    pub approximated: bool,
}

/// One transition resolved to an absolute instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunEphemerisEvent {
    pub event_type: SunEventType,
    pub instant: DateTime<Utc>,
}

impl SunEphemerisEvent {
    pub fn to_event(self) -> HeliosEvent {
        HeliosEvent::SunEphemeris {
            event_type: self.event_type,
            instant: self.instant,
        }
    }
}

impl SunEphemeris {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            times: BTreeMap::new(),
            approximated: false,
        }
    }

    /// Ephemeris made of configured times, marked approximated.
    pub fn fallback(day: NaiveDate, times: &BTreeMap<SunEventType, NaiveTime>) -> Self {
        Self {
            day,
            times: times.clone(),
            approximated: true,
        }
    }

    pub fn with_time(mut self, event_type: SunEventType, time: NaiveTime) -> Self {
        self.times.insert(event_type, time);
        self
    }

    pub fn time_of(&self, event_type: SunEventType) -> Option<NaiveTime> {
        self.times.get(&event_type).copied()
    }

    /// All transitions of the day, ascending by instant.
    pub fn events(&self, clock: &dyn Clock) -> Vec<SunEphemerisEvent> {
        let mut events: Vec<_> = self
            .times
            .iter()
            .map(|(event_type, time)| SunEphemerisEvent {
                event_type: *event_type,
                instant: clock.resolve_local(self.day.and_time(*time)),
            })
            .collect();
        events.sort_by_key(|e| (e.instant, e.event_type));
        events
    }

    /// Earliest transition strictly after `instant`.
    pub fn first_event_after(
        &self,
        instant: DateTime<Utc>,
        clock: &dyn Clock,
    ) -> Option<SunEphemerisEvent> {
        self.events(clock).into_iter().find(|e| e.instant > instant)
    }

    pub fn first_event(&self, clock: &dyn Clock) -> Option<SunEphemerisEvent> {
        self.events(clock).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use helios_core::clock::FixedClock;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 21).unwrap()
    }

    fn ephemeris() -> SunEphemeris {
        SunEphemeris::new(day())
            .with_time(SunEventType::Dusk, t(21, 40))
            .with_time(SunEventType::Dawn, t(3, 40))
            .with_time(SunEventType::Sunrise, t(4, 15))
            .with_time(SunEventType::Noon, t(12, 55))
            .with_time(SunEventType::Sunset, t(21, 0))
    }

    #[test]
    fn events_are_chronological_in_local_zone() {
        let clock = FixedClock::new(Utc::now(), FixedOffset::east_opt(2 * 3600).unwrap());
        let events = ephemeris().events(&clock);
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, SunEventType::ALL.to_vec());
        // 03:40 at UTC+2.
        assert_eq!(events[0].instant, day().and_hms_opt(1, 40, 0).unwrap().and_utc());
    }

    #[test]
    fn first_event_after_is_strict() {
        let clock = FixedClock::new(Utc::now(), FixedOffset::east_opt(0).unwrap());
        let sunrise = day().and_time(t(4, 15)).and_utc();

        let next = ephemeris().first_event_after(sunrise, &clock).unwrap();
        assert_eq!(next.event_type, SunEventType::Noon);

        let after_dusk = day().and_time(t(22, 0)).and_utc();
        assert!(ephemeris().first_event_after(after_dusk, &clock).is_none());
        assert_eq!(ephemeris().first_event(&clock).unwrap().event_type, SunEventType::Dawn);
    }

    #[test]
    fn missing_transitions_are_skipped() {
        let clock = FixedClock::new(Utc::now(), FixedOffset::east_opt(0).unwrap());
        let polar = SunEphemeris::new(day()).with_time(SunEventType::Noon, t(12, 0));
        assert_eq!(polar.events(&clock).len(), 1);
        assert!(SunEphemeris::new(day()).first_event(&clock).is_none());
    }
}
