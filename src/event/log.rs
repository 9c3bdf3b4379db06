//! EventLog - append-only record of run events
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run lifecycle, per-item progress and failures, log lines
//! - EventLog: thread-safe, append-only log

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::planner::{RunMode, RunScope};

/// Single event on a run's stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the emitter was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        group_id: Uuid,
        slug: String,
        mode: RunMode,
        scope: RunScope,
        total: usize,
    },
    /// One item finished (its artifact is already on disk)
    Progress {
        group_id: Uuid,
        completed: usize,
        total: usize,
        current_label: String,
        artifact: Option<PathBuf>,
    },
    ItemFailed {
        group_id: Uuid,
        path: String,
        error: String,
    },
    Log {
        group_id: Uuid,
        message: String,
    },
    Finished {
        group_id: Uuid,
        success_count: usize,
        failure_count: usize,
        status: RunStatus,
    },
}

impl EventKind {
    pub fn group_id(&self) -> Uuid {
        match self {
            Self::RunStarted { group_id, .. }
            | Self::Progress { group_id, .. }
            | Self::ItemFailed { group_id, .. }
            | Self::Log { group_id, .. }
            | Self::Finished { group_id, .. } => *group_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Id and timestamp source shared by every emitter
#[derive(Debug, Clone)]
pub(crate) struct EventClock {
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventClock {
    pub(crate) fn new() -> Self {
        Self {
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn stamp(&self, kind: EventKind) -> Event {
        Event {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        }
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    clock: EventClock,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            clock: EventClock::new(),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let event = self.clock.stamp(kind);
        let id = event.id;
        self.events.write().push(event);
        id
    }

    /// Get all events (cloned - use `with_events` for zero-copy access)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback
    ///
    /// Holds read lock for duration of callback - keep it short.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Events of one group
    pub fn for_group(&self, group_id: Uuid) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.group_id() == group_id)
                .cloned()
                .collect()
        })
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}
