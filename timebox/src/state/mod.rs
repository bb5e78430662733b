// Ledger model: per-task time segments
//
// A TimeBoxState is keyed by the task identity hash. Segments are appended on
// start/resume and closed on pause, completion or termination.

pub mod store;

pub use store::{
    atomic_write, remove_task_state, FileStateStore, InMemoryStateStore, StateError, StateStore,
};

use crate::clock::between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One uninterrupted interval of work. `end == None` means still running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSegment {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeSegment {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Length of the segment, measuring an open segment up to `now`
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        between(self.start, self.end.unwrap_or(now))
    }
}

/// Ledger entry for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBoxState {
    pub task_hash: String,
    #[serde(default)]
    pub segments: Vec<TimeSegment>,
}

impl TimeBoxState {
    pub fn new(task_hash: impl Into<String>) -> Self {
        Self {
            task_hash: task_hash.into(),
            segments: Vec::new(),
        }
    }

    /// Whether the last segment is still open
    pub fn is_active(&self) -> bool {
        self.segments.last().is_some_and(TimeSegment::is_open)
    }

    /// Start of the first segment
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.segments.first().map(|s| s.start)
    }

    /// End of the last segment, or its start while it is still open
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.segments.last().map(|s| s.end.unwrap_or(s.start))
    }

    /// Sum of all segments, an open segment counted up to `now`
    pub fn total_elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.segments.iter().map(|s| s.duration(now)).sum()
    }

    /// Open a new segment at `at`. Returns false if one is already open.
    pub fn open_segment(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_active() {
            return false;
        }
        self.segments.push(TimeSegment {
            start: at,
            end: None,
        });
        true
    }

    /// Close the open segment at `at`. Returns false if nothing was open.
    pub fn close_open_segment(&mut self, at: DateTime<Utc>) -> bool {
        match self.segments.last_mut() {
            Some(last) if last.is_open() => {
                // A clock that went backwards must not produce a negative segment
                last.end = Some(at.max(last.start));
                true
            }
            _ => false,
        }
    }
}

/// Replace the entry with the same hash, or append it
pub fn upsert_state(states: &mut Vec<TimeBoxState>, state: TimeBoxState) {
    match states.iter_mut().find(|s| s.task_hash == state.task_hash) {
        Some(existing) => *existing = state,
        None => states.push(state),
    }
}
