//! Body of one recurring alert task.

use std::sync::Arc;

use helios_core::events::HeliosEvent;
use helios_core::retry::{retry, RetryPolicy};
use helios_core::{Clock, EventStore, SourceError};
use tracing::{debug, error, info};

use super::trigger::TaskTrigger;
use crate::model::Timer;
use crate::repository::TimerRepository;

enum Check {
    Valid(Timer),
    Stale(&'static str),
    Unavailable(SourceError),
}

pub(crate) struct AlertTask {
    pub(crate) trigger: Arc<TaskTrigger>,
    pub(crate) repository: Arc<dyn TimerRepository>,
    pub(crate) events: Arc<dyn EventStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) retry: RetryPolicy,
}

impl AlertTask {
    pub(crate) async fn run(self) {
        let timer_id = self.trigger.schedule().timer_id;
        let schedule_id = self.trigger.schedule().id;
        let mut last_fired = None;

        while let Some(fire_at) = self.trigger.next_fire(self.clock.as_ref(), last_fired) {
            debug!(timer_id, schedule_id, %fire_at, "alert armed");
            tokio::time::sleep(self.clock.duration_until(fire_at)).await;
            if self.trigger.is_stopped() {
                break;
            }

            match self.check(timer_id, schedule_id).await {
                Check::Valid(timer) => {
                    if self.trigger.is_stopped() {
                        break;
                    }
                    info!(timer_id, schedule_id, description = %timer.description, "timer alert");
                    self.events.publish(HeliosEvent::TimerAlert { timer: timer.to_ref() });
                }
                Check::Stale(reason) => {
                    info!(timer_id, schedule_id, reason, "schedule is stale, alert task stops");
                    self.trigger.stop();
                    break;
                }
                Check::Unavailable(e) => {
                    error!(
                        timer_id,
                        schedule_id,
                        error = %e,
                        "could not verify schedule, alert skipped"
                    );
                }
            }
            last_fired = Some(fire_at);
        }
        debug!(timer_id, schedule_id, "alert task finished");
    }

    /// Re-read the timer and check the schedule still matches this task.
    async fn check(&self, timer_id: u64, schedule_id: u64) -> Check {
        let fetched = retry("timer-refetch", &self.retry, || {
            let repository = Arc::clone(&self.repository);
            async move { repository.find_by_id(timer_id).await.map_err(SourceError::from) }
        })
        .await;

        let timer = match fetched {
            Ok(Some(timer)) => timer,
            Ok(None) => return Check::Stale("timer removed"),
            Err(e) => return Check::Unavailable(e),
        };
        match timer.schedule(schedule_id) {
            None => Check::Stale("schedule removed"),
            Some(s) if s.version != self.trigger.version() => Check::Stale("schedule changed"),
            Some(s) if !s.enabled => Check::Stale("schedule disabled"),
            Some(_) => Check::Valid(timer),
        }
    }
}
