//! Firing instants of one scheduled task.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use helios_core::Clock;

use crate::model::TimerSchedule;
use crate::occurrence::{next_occurrence, next_occurrence_after};

/// Firing rule of one alert task, bound to the schedule snapshot the task was
/// started with. Once stopped it never yields another instant.
#[derive(Debug)]
pub struct TaskTrigger {
    schedule: TimerSchedule,
    stopped: Mutex<bool>,
}

impl TaskTrigger {
    pub fn new(schedule: TimerSchedule) -> Self {
        Self {
            schedule,
            stopped: Mutex::new(false),
        }
    }

    pub fn schedule(&self) -> &TimerSchedule {
        &self.schedule
    }

    pub fn version(&self) -> u64 {
        self.schedule.version
    }

    /// Next firing instant, strictly after `after` when given.
    pub fn next_fire(
        &self,
        clock: &dyn Clock,
        after: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if self.is_stopped() {
            return None;
        }
        let schedule = &self.schedule;
        Some(match after {
            None => next_occurrence(&schedule.days, schedule.time, clock),
            Some(fired) => next_occurrence_after(&schedule.days, schedule.time, clock, fired),
        })
    }

    pub fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
