//! Timers and their weekly schedules.

use std::fmt;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use helios_core::events::TimerRef;
use helios_core::Clock;
use serde::{Deserialize, Serialize};

use crate::error::TimerError;
use crate::occurrence;

/// Longest accepted timer description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 30;

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Non-empty set of weekdays, stored as a bitmask (bit 0 = Monday).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Weekday>", into = "Vec<Weekday>")]
pub struct WeekDays(u8);

impl WeekDays {
    pub fn new(days: impl IntoIterator<Item = Weekday>) -> Result<Self, TimerError> {
        let bits = days
            .into_iter()
            .fold(0u8, |bits, day| bits | Self::bit(day));
        if bits == 0 {
            return Err(TimerError::EmptyDays);
        }
        Ok(Self(bits))
    }

    pub fn every_day() -> Self {
        Self(0b111_1111)
    }

    pub fn working_days() -> Self {
        Self(0b001_1111)
    }

    pub fn weekend() -> Self {
        Self(0b110_0000)
    }

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    /// Days in the set, Monday first.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_DAYS.into_iter().filter(move |day| self.contains(*day))
    }

    /// At least one day in common.
    pub fn overlaps(&self, other: &WeekDays) -> bool {
        self.0 & other.0 != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<Vec<Weekday>> for WeekDays {
    type Error = TimerError;

    fn try_from(days: Vec<Weekday>) -> Result<Self, Self::Error> {
        WeekDays::new(days)
    }
}

impl From<WeekDays> for Vec<Weekday> {
    fn from(days: WeekDays) -> Self {
        days.iter().collect()
    }
}

impl fmt::Display for WeekDays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

impl fmt::Debug for WeekDays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeekDays({self})")
    }
}

/// Time of day at which a timer fires on the given weekdays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSchedule {
    /// Zero until saved.
    pub id: u64,
    pub timer_id: u64,
    pub time: NaiveTime,
    pub days: WeekDays,
    pub enabled: bool,
    /// Bumped by the repository whenever time, days or enabled change.
    pub version: u64,
}

impl TimerSchedule {
    pub fn new(time: NaiveTime, days: WeekDays, enabled: bool) -> Self {
        Self {
            id: 0,
            timer_id: 0,
            time,
            days,
            enabled,
            version: 0,
        }
    }

    /// Same time of day on the same days.
    pub fn is_same_as(&self, other: &TimerSchedule) -> bool {
        self.time == other.time && self.days == other.days
    }

    /// Shares at least one weekday with `other`.
    pub fn is_overlapping(&self, other: &TimerSchedule) -> bool {
        self.days.overlaps(&other.days)
    }

    pub(crate) fn definition_differs(&self, other: &TimerSchedule) -> bool {
        !self.is_same_as(other) || self.enabled != other.enabled
    }

    pub fn next_occurrence(&self, clock: &dyn Clock) -> DateTime<Utc> {
        occurrence::next_occurrence(&self.days, self.time, clock)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    /// Zero until saved.
    pub id: u64,
    pub description: String,
    pub schedules: Vec<TimerSchedule>,
    pub version: u64,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl Timer {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: 0,
            description: description.into(),
            schedules: Vec::new(),
            version: 0,
            created: None,
            updated: None,
        }
    }

    pub fn schedule(&self, schedule_id: u64) -> Option<&TimerSchedule> {
        self.schedules.iter().find(|s| s.id == schedule_id)
    }

    pub fn schedule_mut(&mut self, schedule_id: u64) -> Option<&mut TimerSchedule> {
        self.schedules.iter_mut().find(|s| s.id == schedule_id)
    }

    pub fn add(&mut self, mut schedule: TimerSchedule) {
        schedule.timer_id = self.id;
        self.schedules.push(schedule);
    }

    pub fn has_same(&self, schedule: &TimerSchedule) -> bool {
        self.schedules.iter().any(|s| s.is_same_as(schedule))
    }

    pub fn has_overlapping(&self, schedule: &TimerSchedule) -> bool {
        self.schedules.iter().any(|s| s.is_overlapping(schedule))
    }

    /// Earliest upcoming alert across enabled schedules.
    pub fn next_occurrence(&self, clock: &dyn Clock) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.next_occurrence(clock))
            .min()
    }

    pub fn to_ref(&self) -> TimerRef {
        TimerRef {
            id: self.id,
            description: self.description.clone(),
        }
    }
}
