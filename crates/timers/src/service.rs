//! Timer management operations.
//!
//! Every structural change is saved through the repository and then handed to
//! [`AlertScheduler::start_for`], so the running alert tasks always follow the
//! stored schedules.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use helios_core::events::HeliosEvent;
use helios_core::{Clock, EventStore};
use tracing::{debug, info, warn};

use crate::error::TimerError;
use crate::model::{Timer, TimerSchedule, WeekDays, MAX_DESCRIPTION_LEN};
use crate::repository::TimerRepository;
use crate::scheduler::AlertScheduler;

pub struct TimerService {
    repository: Arc<dyn TimerRepository>,
    scheduler: Arc<AlertScheduler>,
    events: Arc<dyn EventStore>,
}

fn validate_description(description: &str) -> Result<(), TimerError> {
    let len = description.chars().count();
    if len == 0 || len > MAX_DESCRIPTION_LEN {
        return Err(TimerError::InvalidDescription { len });
    }
    Ok(())
}

impl TimerService {
    pub fn new(
        repository: Arc<dyn TimerRepository>,
        scheduler: Arc<AlertScheduler>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            repository,
            scheduler,
            events,
        }
    }

    async fn timer(&self, timer_id: u64) -> Result<Timer, TimerError> {
        self.repository
            .find_by_id(timer_id)
            .await?
            .ok_or_else(|| TimerError::timer_not_found(timer_id))
    }

    async fn save_and_restart(&self, timer: Timer) -> Result<Timer, TimerError> {
        let saved = self.repository.save(timer).await?;
        self.scheduler.start_for(&saved);
        Ok(saved)
    }

    pub async fn timers(&self) -> Result<Vec<Timer>, TimerError> {
        debug!("Searching for timers");
        Ok(self.repository.find_all().await?)
    }

    /// Register a timer. An existing timer with the same description is
    /// returned unchanged.
    pub async fn add_timer(&self, description: &str) -> Result<Timer, TimerError> {
        debug!("Adding timer with description '{}'", description);
        validate_description(description)?;
        if let Some(existing) = self.repository.find_by_description(description).await? {
            warn!(
                "Did not add timer with description '{}' as it exists (id '{}')",
                description, existing.id
            );
            return Ok(existing);
        }
        let saved = self.repository.save(Timer::new(description)).await?;
        info!(timer_id = saved.id, "Timer '{}' added", description);
        Ok(saved)
    }

    /// Remove a timer, stop its alerts and announce the removal. Returns false
    /// when the timer did not exist.
    pub async fn remove_timer(&self, timer_id: u64) -> Result<bool, TimerError> {
        debug!("Removing timer {}", timer_id);
        let Some(removed) = self.repository.delete(timer_id).await? else {
            warn!("Did not remove timer {} as it does not exist", timer_id);
            return Ok(false);
        };
        self.scheduler.stop_for(timer_id);
        info!(timer_id, "Timer '{}' removed", removed.description);
        self.events.publish(HeliosEvent::TimerRemoved {
            timer: removed.to_ref(),
        });
        Ok(true)
    }

    pub async fn change_description(
        &self,
        timer_id: u64,
        description: &str,
    ) -> Result<Timer, TimerError> {
        debug!("Changing timer {} description to '{}'", timer_id, description);
        validate_description(description)?;
        let mut timer = self.timer(timer_id).await?;
        if timer.description == description {
            warn!(
                "Did not change timer {} description to '{}' as this is current description",
                timer_id, description
            );
            return Ok(timer);
        }
        if let Some(existing) = self.repository.find_by_description(description).await? {
            return Err(TimerError::Duplicate {
                description: description.to_string(),
                existing_id: existing.id,
            });
        }
        timer.description = description.to_string();
        Ok(self.repository.save(timer).await?)
    }

    pub async fn schedules(&self, timer_id: u64) -> Result<Vec<TimerSchedule>, TimerError> {
        debug!("Searching for schedules of timer {}", timer_id);
        Ok(self.timer(timer_id).await?.schedules)
    }

    /// Add a schedule. A schedule with the same time and days is a no-op; one
    /// sharing any weekday with an existing schedule is rejected.
    pub async fn add_schedule(
        &self,
        timer_id: u64,
        time: NaiveTime,
        days: WeekDays,
        enabled: bool,
    ) -> Result<Timer, TimerError> {
        debug!("Adding schedule {} on {} to timer {}", time, days, timer_id);
        let mut timer = self.timer(timer_id).await?;
        let schedule = TimerSchedule::new(time, days, enabled);
        if timer.has_same(&schedule) {
            warn!("Did not add schedule to timer {} as it exists", timer_id);
            return Ok(timer);
        }
        if timer.has_overlapping(&schedule) {
            return Err(TimerError::Overlapping { timer_id, time, days });
        }
        timer.add(schedule);
        self.save_and_restart(timer).await
    }

    pub async fn remove_schedule(
        &self,
        timer_id: u64,
        schedule_id: u64,
    ) -> Result<Timer, TimerError> {
        debug!("Removing schedule {} from timer {}", schedule_id, timer_id);
        let mut timer = self.timer(timer_id).await?;
        if timer.schedule(schedule_id).is_none() {
            warn!(
                "Did not remove schedule {} from timer {} as schedule does not exist",
                schedule_id, timer_id
            );
            return Ok(timer);
        }
        timer.schedules.retain(|s| s.id != schedule_id);
        self.save_and_restart(timer).await
    }

    pub async fn set_schedule_enabled(
        &self,
        timer_id: u64,
        schedule_id: u64,
        enabled: bool,
    ) -> Result<Timer, TimerError> {
        debug!("Setting schedule {} of timer {} enabled={}", schedule_id, timer_id, enabled);
        let mut timer = self.timer(timer_id).await?;
        let schedule = timer
            .schedule_mut(schedule_id)
            .ok_or_else(|| TimerError::schedule_not_found(schedule_id))?;
        if schedule.enabled == enabled {
            return Ok(timer);
        }
        schedule.enabled = enabled;
        self.save_and_restart(timer).await
    }

    /// Description of every timer with its nearest alert, `None` when nothing
    /// is scheduled.
    pub async fn overview(
        &self,
        clock: &dyn Clock,
    ) -> Result<BTreeMap<String, Option<DateTime<Utc>>>, TimerError> {
        let timers = self.repository.find_all().await?;
        Ok(timers
            .iter()
            .map(|t| (t.description.clone(), t.next_occurrence(clock)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Weekday};
    use helios_core::clock::FixedClock;
    use helios_core::events::{topics, RecordingEventStore};
    use helios_core::retry::RetryPolicy;
    use std::time::Duration;

    use crate::repository::InMemoryTimerRepository;

    struct Fixture {
        service: TimerService,
        scheduler: Arc<AlertScheduler>,
        events: Arc<RecordingEventStore>,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::at_local(
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap().and_hms_opt(6, 0, 0).unwrap(),
        ));
        let repository: Arc<dyn TimerRepository> = Arc::new(InMemoryTimerRepository::new(clock.clone()));
        let events = Arc::new(RecordingEventStore::new());
        let scheduler = Arc::new(AlertScheduler::new(
            Arc::clone(&repository),
            events.clone(),
            clock.clone(),
            RetryPolicy::new(1, Duration::ZERO),
        ));
        Fixture {
            service: TimerService::new(repository, Arc::clone(&scheduler), events.clone()),
            scheduler,
            events,
            clock,
        }
    }

    fn at(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn duplicate_timer_returns_existing() {
        let fx = fixture();
        let first = fx.service.add_timer("kitchen").await.unwrap();
        let second = fx.service.add_timer("kitchen").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(fx.service.timers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn description_length_is_checked() {
        let fx = fixture();
        assert!(matches!(
            fx.service.add_timer("").await,
            Err(TimerError::InvalidDescription { len: 0 })
        ));
        let long = "x".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(fx.service.add_timer(&long).await.is_err());
    }

    #[tokio::test]
    async fn change_description_rejects_taken_name() {
        let fx = fixture();
        let a = fx.service.add_timer("a").await.unwrap();
        fx.service.add_timer("b").await.unwrap();

        assert!(matches!(
            fx.service.change_description(a.id, "b").await,
            Err(TimerError::Duplicate { .. })
        ));
        let renamed = fx.service.change_description(a.id, "c").await.unwrap();
        assert_eq!(renamed.description, "c");
        assert!(matches!(
            fx.service.change_description(99, "d").await,
            Err(TimerError::NotFound { entity: "timer", id: 99 })
        ));
    }

    #[tokio::test]
    async fn add_schedule_starts_alert_task() {
        let fx = fixture();
        let timer = fx.service.add_timer("t").await.unwrap();
        let timer = fx
            .service
            .add_schedule(timer.id, at(7), WeekDays::working_days(), true)
            .await
            .unwrap();

        assert_eq!(fx.scheduler.live_tasks(), vec![(timer.schedules[0].id, 1)]);
    }

    #[tokio::test]
    async fn same_schedule_is_noop_and_overlap_is_rejected() {
        let fx = fixture();
        let timer = fx.service.add_timer("t").await.unwrap();
        fx.service.add_schedule(timer.id, at(7), WeekDays::working_days(), true).await.unwrap();

        let again = fx
            .service
            .add_schedule(timer.id, at(7), WeekDays::working_days(), false)
            .await
            .unwrap();
        assert_eq!(again.schedules.len(), 1);

        let overlap = fx
            .service
            .add_schedule(timer.id, at(9), WeekDays::new([Weekday::Fri, Weekday::Sat]).unwrap(), true)
            .await;
        assert!(matches!(overlap, Err(TimerError::Overlapping { .. })));

        fx.service.add_schedule(timer.id, at(9), WeekDays::weekend(), true).await.unwrap();
        assert_eq!(fx.service.schedules(timer.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disable_and_remove_schedule_stop_tasks() {
        let fx = fixture();
        let timer = fx.service.add_timer("t").await.unwrap();
        let timer = fx
            .service
            .add_schedule(timer.id, at(7), WeekDays::every_day(), true)
            .await
            .unwrap();
        let schedule_id = timer.schedules[0].id;

        fx.service.set_schedule_enabled(timer.id, schedule_id, false).await.unwrap();
        assert!(fx.scheduler.live_tasks().is_empty());

        fx.service.set_schedule_enabled(timer.id, schedule_id, true).await.unwrap();
        assert_eq!(fx.scheduler.live_tasks(), vec![(schedule_id, 3)]);

        fx.service.remove_schedule(timer.id, schedule_id).await.unwrap();
        assert!(fx.scheduler.live_tasks().is_empty());
        assert!(matches!(
            fx.service.set_schedule_enabled(timer.id, schedule_id, true).await,
            Err(TimerError::NotFound { entity: "schedule", .. })
        ));
    }

    #[tokio::test]
    async fn remove_timer_publishes_and_stops() {
        let fx = fixture();
        let timer = fx.service.add_timer("t").await.unwrap();
        fx.service.add_schedule(timer.id, at(7), WeekDays::every_day(), true).await.unwrap();

        assert!(fx.service.remove_timer(timer.id).await.unwrap());
        assert!(!fx.service.remove_timer(timer.id).await.unwrap());
        assert!(fx.scheduler.live_tasks().is_empty());
        assert_eq!(fx.events.count(topics::TIMER_REMOVED), 1);
    }

    #[tokio::test]
    async fn overview_lists_nearest_alerts() {
        let fx = fixture();
        let timer = fx.service.add_timer("bedroom").await.unwrap();
        fx.service.add_timer("idle").await.unwrap();
        fx.service.add_schedule(timer.id, at(7), WeekDays::every_day(), true).await.unwrap();

        let overview = fx.service.overview(fx.clock.as_ref()).await.unwrap();
        assert_eq!(overview["idle"], None);
        assert_eq!(
            overview["bedroom"].map(|i| fx.clock.to_local(i)),
            Some(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap().and_hms_opt(7, 0, 0).unwrap())
        );
    }
}
