//! Recurring alert scheduling.
//!
//! Every enabled [`TimerSchedule`](crate::model::TimerSchedule) gets its own
//! tokio task. The task sleeps until the next occurrence, re-reads the timer,
//! and publishes a timer alert only if the schedule it was started with is
//! still current. A stale schedule stops its task for good; the replacement
//! task is started by [`AlertScheduler::start_for`].

mod core;
mod task;
mod trigger;


pub use self::core::AlertScheduler;
pub use self::trigger::TaskTrigger;
