//! Next-occurrence calculation for weekly schedules.

use chrono::{DateTime, Datelike, Days, NaiveDateTime, NaiveTime, Utc};
use helios_core::Clock;

use crate::model::WeekDays;

/// Next local date-time at `time` on one of `days`, not earlier than `now`.
///
/// Today qualifies when it is in the set and `time` has not passed yet; the
/// exact current instant counts as not passed.
pub fn next_occurrence_local(
    days: &WeekDays,
    time: NaiveTime,
    now: NaiveDateTime,
) -> NaiveDateTime {
    let today = now.date();
    if days.contains(today.weekday()) && time >= now.time() {
        return today.and_time(time);
    }
    // A week ahead always contains every weekday once, today's included.
    for offset in 1..=7 {
        let date = today + Days::new(offset);
        if days.contains(date.weekday()) {
            return date.and_time(time);
        }
    }
    (today + Days::new(7)).and_time(time)
}

/// Next occurrence as an absolute instant, resolved in the clock's local zone.
pub fn next_occurrence(days: &WeekDays, time: NaiveTime, clock: &dyn Clock) -> DateTime<Utc> {
    clock.resolve_local(next_occurrence_local(days, time, clock.local_now()))
}

/// Next occurrence strictly after `after` (and not before now).
pub fn next_occurrence_after(
    days: &WeekDays,
    time: NaiveTime,
    clock: &dyn Clock,
    after: DateTime<Utc>,
) -> DateTime<Utc> {
    let reference = clock.now().max(after + chrono::Duration::milliseconds(1));
    clock.resolve_local(next_occurrence_local(days, time, clock.to_local(reference)))
}
