//! Per-collaborator health tracking.
//!
//! A [`HealthTracker`] remembers the outcome of the last few requests made to
//! one external collaborator and derives an up/down status from them.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Default number of recent attempts kept per tracker.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Up,
    Down,
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestAttempt {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Successful response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// History entry as exposed in snapshots: no payload, no reason.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub name: String,
    pub status: HealthStatus,
    pub all_requests: u64,
    /// Percentage of successful requests, 0 with no requests.
    pub success_rate: f64,
    pub failure_rate: f64,
    pub last_success: Option<RequestAttempt>,
    pub last_failure: Option<RequestAttempt>,
    /// Newest first.
    pub recent_history: Vec<HistoryEntry>,
}

#[derive(Debug, Default)]
struct HealthState {
    history: VecDeque<RequestAttempt>,
    successes: u64,
    failures: u64,
    last_success: Option<RequestAttempt>,
    last_failure: Option<RequestAttempt>,
}

pub struct HealthTracker {
    name: String,
    capacity: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<HealthState>,
}

impl fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthTracker")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl HealthTracker {
    /// `capacity` is clamped to at least one entry. Attempts are stamped with
    /// `clock`.
    pub fn new(name: impl Into<String>, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            clock,
            state: Mutex::new(HealthState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_success(&self, payload: serde_json::Value) {
        self.record(RequestAttempt {
            timestamp: self.clock.now(),
            success: true,
            payload: Some(payload),
            reason: None,
        });
    }

    pub fn record_failure(&self, reason: impl Display) {
        self.record(RequestAttempt {
            timestamp: self.clock.now(),
            success: false,
            payload: None,
            reason: Some(reason.to_string()),
        });
    }

    fn record(&self, attempt: RequestAttempt) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if attempt.success {
            state.successes += 1;
            state.last_success = Some(attempt.clone());
        } else {
            state.failures += 1;
            state.last_failure = Some(attempt.clone());
        }
        state.history.push_front(attempt);
        state.history.truncate(self.capacity);
    }

    pub fn status(&self) -> HealthStatus {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        status_of(&state)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let all_requests = state.successes + state.failures;
        let rate = |count: u64| {
            if all_requests == 0 {
                0.0
            } else {
                count as f64 * 100.0 / all_requests as f64
            }
        };
        HealthSnapshot {
            name: self.name.clone(),
            status: status_of(&state),
            all_requests,
            success_rate: rate(state.successes),
            failure_rate: rate(state.failures),
            last_success: state.last_success.clone(),
            last_failure: state.last_failure.clone(),
            recent_history: state
                .history
                .iter()
                .map(|a| HistoryEntry {
                    timestamp: a.timestamp,
                    success: a.success,
                })
                .collect(),
        }
    }
}

fn status_of(state: &HealthState) -> HealthStatus {
    match state.history.front() {
        None => HealthStatus::Unknown,
        Some(newest) if newest.success => HealthStatus::Up,
        Some(_) => HealthStatus::Down,
    }
}

/// Named trackers sharing one history capacity and clock.
pub struct HealthRegistry {
    capacity: usize,
    clock: Arc<dyn Clock>,
    trackers: RwLock<BTreeMap<String, Arc<HealthTracker>>>,
}

impl fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthRegistry")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl HealthRegistry {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            clock,
            trackers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Tracker for `name`, created on first use.
    pub fn tracker(&self, name: &str) -> Arc<HealthTracker> {
        if let Some(existing) = self
            .trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(existing);
        }
        let mut trackers = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            trackers
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(HealthTracker::new(name, self.capacity, Arc::clone(&self.clock)))
                }),
        )
    }

    /// Snapshots of every tracker, sorted by name.
    pub fn snapshot_all(&self) -> Vec<HealthSnapshot> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.snapshot())
            .collect()
    }
}
