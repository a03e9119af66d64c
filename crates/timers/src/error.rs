use chrono::NaiveTime;
use helios_core::SourceError;
use thiserror::Error;

use crate::model::{WeekDays, MAX_DESCRIPTION_LEN};

/// Failures of a [`TimerRepository`](crate::repository::TimerRepository) backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("timer {0} does not exist")]
    NotFound(u64),

    #[error("timer {id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict { id: u64, expected: u64, actual: u64 },

    #[error("repository backend failure: {0}")]
    Backend(String),
}

impl From<RepositoryError> for SourceError {
    fn from(e: RepositoryError) -> Self {
        SourceError::Unavailable(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TimerError {
    #[error("Not found {entity} with id {id}")]
    NotFound { entity: &'static str, id: u64 },

    #[error("Could not add schedule {time} for timer {timer_id} as some days are overlapping: {days}")]
    Overlapping {
        timer_id: u64,
        time: NaiveTime,
        days: WeekDays,
    },

    #[error("Timer with description '{description}' already exists (id {existing_id})")]
    Duplicate {
        description: String,
        existing_id: u64,
    },

    #[error("Schedule must have at least one day of week")]
    EmptyDays,

    #[error("Timer description must have 1 to {max} characters, got {len}", max = MAX_DESCRIPTION_LEN)]
    InvalidDescription { len: usize },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TimerError {
    pub(crate) fn timer_not_found(id: u64) -> Self {
        TimerError::NotFound { entity: "timer", id }
    }

    pub(crate) fn schedule_not_found(id: u64) -> Self {
        TimerError::NotFound { entity: "schedule", id }
    }
}
