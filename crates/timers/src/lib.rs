//! Timers: weekly schedules that publish alerts at a time of day.

pub mod error;
pub mod model;
pub mod occurrence;
pub mod repository;
pub mod scheduler;
pub mod service;

pub use error::{RepositoryError, TimerError};
pub use model::{Timer, TimerSchedule, WeekDays};
pub use repository::{InMemoryTimerRepository, TimerRepository};
pub use scheduler::AlertScheduler;
pub use service::TimerService;
