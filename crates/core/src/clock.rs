//! Clock abstraction for every "now" read in the scheduling core.
//!
//! Instants are carried as `DateTime<Utc>`; schedules and ephemerides are
//! expressed in local wall time, so a clock also knows its zone offset.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Local zone offset in effect at `instant`.
    fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset;

    /// Resolve a local wall-clock time to an absolute instant.
    fn resolve_local(&self, local: NaiveDateTime) -> DateTime<Utc>;

    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset_at(instant)).naive_local()
    }

    fn local_now(&self) -> NaiveDateTime {
        self.to_local(self.now())
    }

    fn today(&self) -> NaiveDate {
        self.local_now().date()
    }

    /// Time left until `instant`, zero if it already passed.
    fn duration_until(&self, instant: DateTime<Utc>) -> Duration {
        (instant - self.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

fn resolve_fixed(offset: FixedOffset, local: NaiveDateTime) -> DateTime<Utc> {
    match offset.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        _ => Utc.from_utc_datetime(&local),
    }
}

/// Wall clock of the process, in the system time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        Local.offset_from_utc_datetime(&instant.naive_utc()).fix()
    }

    /// Ambiguous local times (DST fall-back) map to the earliest instant; local
    /// times inside a DST gap are resolved with the offset in effect before it.
    fn resolve_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match Local.from_local_datetime(&local) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                let offset = Local
                    .from_local_datetime(&(local - chrono::Duration::hours(3)))
                    .earliest()
                    .map(|dt| dt.offset().fix())
                    .unwrap_or_else(|| Utc.fix());
                resolve_fixed(offset, local)
            }
        }
    }
}

/// Manually driven clock with a fixed zone offset.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Clock whose local wall time is `local` in a UTC zone.
    pub fn at_local(local: NaiveDateTime) -> Self {
        Self::new(Utc.from_utc_datetime(&local), Utc.fix())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offset_at(&self, _instant: DateTime<Utc>) -> FixedOffset {
        self.offset
    }

    fn resolve_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        resolve_fixed(self.offset, local)
    }
}

/// Wall clock anchored to the tokio clock.
///
/// Reads `base + (tokio::time::Instant::now() - anchor)`, so under
/// `tokio::time::pause()` it advances exactly as far as the runtime's timers do.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: DateTime<Utc>,
    anchor: tokio::time::Instant,
    offset: FixedOffset,
}

impl TokioClock {
    pub fn new(base: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            base,
            anchor: tokio::time::Instant::now(),
            offset,
        }
    }

    /// Clock starting at local wall time `local` in a UTC zone.
    pub fn at_local(local: NaiveDateTime) -> Self {
        Self::new(Utc.from_utc_datetime(&local), Utc.fix())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.anchor);
        self.base + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn offset_at(&self, _instant: DateTime<Utc>) -> FixedOffset {
        self.offset
    }

    fn resolve_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        resolve_fixed(self.offset, local)
    }
}
