//! Timer storage seam and the in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use helios_core::Clock;
use tracing::debug;

use crate::error::RepositoryError;
use crate::model::Timer;

/// Storage of timers together with their schedules.
///
/// `save` is responsible for identity and versioning: it assigns ids to new
/// timers and schedules, bumps the timer version on every save, bumps a
/// schedule version whenever its definition changed, and rejects saves of a
/// timer whose version is no longer current.
#[async_trait]
pub trait TimerRepository: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Timer>, RepositoryError>;

    async fn find_by_id(&self, id: u64) -> Result<Option<Timer>, RepositoryError>;

    async fn find_by_description(
        &self,
        description: &str,
    ) -> Result<Option<Timer>, RepositoryError>;

    async fn save(&self, timer: Timer) -> Result<Timer, RepositoryError>;

    /// Remove a timer. Returns the removed timer, `None` if it did not exist.
    async fn delete(&self, id: u64) -> Result<Option<Timer>, RepositoryError>;
}

#[derive(Debug, Default)]
struct Store {
    timers: BTreeMap<u64, Timer>,
    timer_seq: u64,
    schedule_seq: u64,
}

/// Timers kept in process memory. `created` and `updated` are read from
/// `clock`.
pub struct InMemoryTimerRepository {
    store: RwLock<Store>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for InMemoryTimerRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTimerRepository")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl InMemoryTimerRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            clock,
        }
    }
}

#[async_trait]
impl TimerRepository for InMemoryTimerRepository {
    async fn find_all(&self) -> Result<Vec<Timer>, RepositoryError> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store.timers.values().cloned().collect())
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<Timer>, RepositoryError> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store.timers.get(&id).cloned())
    }

    async fn find_by_description(
        &self,
        description: &str,
    ) -> Result<Option<Timer>, RepositoryError> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store
            .timers
            .values()
            .find(|t| t.description == description)
            .cloned())
    }

    async fn save(&self, mut timer: Timer) -> Result<Timer, RepositoryError> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();

        let previous = if timer.id == 0 {
            store.timer_seq += 1;
            timer.id = store.timer_seq;
            timer.created = Some(now);
            None
        } else {
            let existing = store
                .timers
                .get(&timer.id)
                .ok_or(RepositoryError::NotFound(timer.id))?;
            if existing.version != timer.version {
                return Err(RepositoryError::Conflict {
                    id: timer.id,
                    expected: timer.version,
                    actual: existing.version,
                });
            }
            timer.created = existing.created;
            Some(existing.schedules.clone())
        };
        timer.version += 1;
        timer.updated = Some(now);

        for schedule in &mut timer.schedules {
            schedule.timer_id = timer.id;
            let stored = previous
                .as_ref()
                .and_then(|old| old.iter().find(|s| schedule.id != 0 && s.id == schedule.id));
            match stored {
                Some(old) if schedule.definition_differs(old) => schedule.version = old.version + 1,
                Some(old) => schedule.version = old.version,
                None => {
                    store.schedule_seq += 1;
                    schedule.id = store.schedule_seq;
                    schedule.version = 1;
                }
            }
        }

        debug!(timer_id = timer.id, version = timer.version, "timer saved");
        store.timers.insert(timer.id, timer.clone());
        Ok(timer)
    }

    async fn delete(&self, id: u64) -> Result<Option<Timer>, RepositoryError> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        Ok(store.timers.remove(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TimerSchedule, WeekDays};
    use chrono::{NaiveDate, NaiveTime};
    use helios_core::clock::FixedClock;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::at_local(
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap().and_hms_opt(8, 0, 0).unwrap(),
        ))
    }

    fn schedule(h: u32) -> TimerSchedule {
        TimerSchedule::new(NaiveTime::from_hms_opt(h, 0, 0).unwrap(), WeekDays::every_day(), true)
    }

    #[tokio::test]
    async fn save_assigns_ids_and_versions() {
        let repo = InMemoryTimerRepository::new(clock());
        let mut timer = Timer::new("living room");
        timer.add(schedule(7));
        let saved = repo.save(timer).await.unwrap();

        assert_eq!(saved.id, 1);
        assert_eq!(saved.version, 1);
        assert!(saved.created.is_some());
        assert_eq!(saved.schedules[0].id, 1);
        assert_eq!(saved.schedules[0].timer_id, 1);
        assert_eq!(saved.schedules[0].version, 1);
    }

    #[tokio::test]
    async fn schedule_version_bumps_only_on_change() {
        let repo = InMemoryTimerRepository::new(clock());
        let mut timer = Timer::new("t");
        timer.add(schedule(7));
        timer.add(schedule(8));
        let mut saved = repo.save(timer).await.unwrap();

        saved.schedules[1].enabled = false;
        let saved = repo.save(saved).await.unwrap();

        assert_eq!(saved.version, 2);
        assert_eq!(saved.schedules[0].version, 1);
        assert_eq!(saved.schedules[1].version, 2);
    }

    #[tokio::test]
    async fn timestamps_come_from_the_clock() {
        let clock = clock();
        let repo = InMemoryTimerRepository::new(clock.clone());
        let created_at = clock.now();
        let saved = repo.save(Timer::new("t")).await.unwrap();
        assert_eq!(saved.created, Some(created_at));
        assert_eq!(saved.updated, Some(created_at));

        clock.advance(chrono::Duration::minutes(10));
        let saved = repo.save(saved).await.unwrap();
        assert_eq!(saved.created, Some(created_at));
        assert_eq!(saved.updated, Some(created_at + chrono::Duration::minutes(10)));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let repo = InMemoryTimerRepository::new(clock());
        let saved = repo.save(Timer::new("t")).await.unwrap();
        repo.save(saved.clone()).await.unwrap();

        let err = repo.save(saved).await.unwrap_err();
        assert_eq!(err, RepositoryError::Conflict { id: 1, expected: 1, actual: 2 });
    }

    #[tokio::test]
    async fn saving_unknown_id_fails() {
        let repo = InMemoryTimerRepository::new(clock());
        let mut ghost = Timer::new("ghost");
        ghost.id = 42;
        assert_eq!(repo.save(ghost).await.unwrap_err(), RepositoryError::NotFound(42));
    }

    #[tokio::test]
    async fn find_and_delete() {
        let repo = InMemoryTimerRepository::new(clock());
        let saved = repo.save(Timer::new("garden")).await.unwrap();

        assert_eq!(repo.find_by_description("garden").await.unwrap().map(|t| t.id), Some(saved.id));
        assert!(repo.find_by_description("attic").await.unwrap().is_none());
        assert!(repo.delete(saved.id).await.unwrap().is_some());
        assert!(repo.delete(saved.id).await.unwrap().is_none());
        assert!(repo.find_all().await.unwrap().is_empty());
    }
}
