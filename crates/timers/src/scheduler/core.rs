//! [`AlertScheduler`]: one alert task per enabled timer schedule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use helios_core::retry::RetryPolicy;
use helios_core::{Clock, EventStore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::task::AlertTask;
use super::trigger::TaskTrigger;
use crate::error::RepositoryError;
use crate::model::{Timer, TimerSchedule};
use crate::repository::TimerRepository;

struct TaskHandle {
    timer_id: u64,
    version: u64,
    trigger: Arc<TaskTrigger>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    fn is_live(&self) -> bool {
        !self.trigger.is_stopped() && !self.join.is_finished()
    }

    fn stop(&self) {
        self.trigger.stop();
        self.join.abort();
    }
}

/// Version marking a timer whose tasks were stopped for good.
const REMOVED: u64 = u64::MAX;

#[derive(Default)]
struct Tasks {
    /// Keyed by schedule id.
    by_schedule: HashMap<u64, TaskHandle>,
    /// Newest timer version handed to `start_for`, keyed by timer id.
    timer_versions: HashMap<u64, u64>,
}

/// Recurring alert scheduler.
///
/// Tasks are keyed by schedule id. Call [`start_for`](AlertScheduler::start_for)
/// after every change of a timer; it starts, replaces or stops that timer's
/// tasks so they match its current schedules. Snapshots older than one already
/// applied are ignored.
pub struct AlertScheduler {
    repository: Arc<dyn TimerRepository>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    tasks: Mutex<Tasks>,
    shutdown: AtomicBool,
}

impl AlertScheduler {
    pub fn new(
        repository: Arc<dyn TimerRepository>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            events,
            clock,
            retry,
            tasks: Mutex::new(Tasks::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Start tasks for every stored timer. Returns the number of live tasks.
    pub async fn start_all(&self) -> Result<usize, RepositoryError> {
        let timers = self.repository.find_all().await?;
        for timer in &timers {
            self.start_for(timer);
        }
        let live = self.live_tasks().len();
        info!(timers = timers.len(), tasks = live, "alert scheduler started");
        Ok(live)
    }

    /// Bring the tasks of `timer` in line with its schedules.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_for(&self, timer: &Timer) {
        if self.shutdown.load(Ordering::Relaxed) {
            warn!(timer_id = timer.id, "alert scheduler is shut down, tasks not started");
            return;
        }
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let Tasks {
            by_schedule: tasks,
            timer_versions,
        } = &mut *guard;

        let known = timer_versions.entry(timer.id).or_insert(0);
        if timer.version < *known {
            debug!(
                timer_id = timer.id,
                version = timer.version,
                known = *known,
                "ignoring outdated timer snapshot"
            );
            return;
        }
        *known = timer.version;

        tasks.retain(|schedule_id, handle| {
            let wanted = handle.timer_id != timer.id
                || timer.schedules.iter().any(|s| s.id == *schedule_id && s.enabled);
            if !wanted {
                debug!(timer_id = timer.id, schedule_id, "stopping alert task of removed schedule");
                handle.stop();
            }
            wanted
        });

        for schedule in timer.schedules.iter().filter(|s| s.enabled) {
            if let Some(existing) = tasks.get(&schedule.id) {
                if existing.is_live() && existing.version == schedule.version {
                    continue;
                }
                debug!(
                    timer_id = timer.id,
                    schedule_id = schedule.id,
                    old_version = existing.version,
                    new_version = schedule.version,
                    "replacing alert task"
                );
                existing.stop();
            }
            let handle = self.spawn_task(schedule);
            tasks.insert(schedule.id, handle);
        }
    }

    fn spawn_task(&self, schedule: &TimerSchedule) -> TaskHandle {
        let trigger = Arc::new(TaskTrigger::new(schedule.clone()));
        let task = AlertTask {
            trigger: Arc::clone(&trigger),
            repository: Arc::clone(&self.repository),
            events: Arc::clone(&self.events),
            clock: Arc::clone(&self.clock),
            retry: self.retry.clone(),
        };
        info!(
            timer_id = schedule.timer_id,
            schedule_id = schedule.id,
            time = %schedule.time,
            days = %schedule.days,
            "alert task started"
        );
        TaskHandle {
            timer_id: schedule.timer_id,
            version: schedule.version,
            trigger,
            join: tokio::spawn(task.run()),
        }
    }

    /// Stop every task of a removed timer. Later `start_for` calls for it are
    /// ignored.
    pub fn stop_for(&self, timer_id: u64) {
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        guard.timer_versions.insert(timer_id, REMOVED);
        guard.by_schedule.retain(|schedule_id, handle| {
            if handle.timer_id == timer_id {
                debug!(timer_id, schedule_id, "stopping alert task");
                handle.stop();
                false
            } else {
                true
            }
        });
    }

    /// Stop all tasks. Later `start_for` calls are ignored.
    pub fn shutdown(&self) {
        info!("Alert scheduler shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
        let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in guard.by_schedule.values() {
            handle.stop();
        }
        guard.by_schedule.clear();
    }

    /// `(schedule_id, version)` of every live task, ordered by schedule id.
    pub fn live_tasks(&self) -> Vec<(u64, u64)> {
        let guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut live: Vec<_> = guard
            .by_schedule
            .iter()
            .filter(|(_, h)| h.is_live())
            .map(|(id, h)| (*id, h.version))
            .collect();
        live.sort_unstable();
        live
    }
}
