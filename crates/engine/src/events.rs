//! Synchronous event bus decoupling the orchestrator from its observers.
//!
//! The orchestrator and workers publish job-lifecycle events; observers (a
//! console logger, a dashboard) subscribe per event kind. Publishing is
//! synchronous and happens on the publishing task, so handlers must be fast
//! and non-blocking. Handlers are trusted internal observers: a panicking
//! handler propagates straight to the publisher rather than being swallowed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kinds of events published during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DiscoveryStarted,
    DiscoveryFinished,
    JobAdmitted,
    JobStarted,
    JobProgress,
    JobCompleted,
    JobFailed,
    JobSkipped,
    HardwareCapabilityLimited,
    ConcurrencyLevelChanged,
    ShutdownRequested,
    RunFinished,
}

/// Event payload carrying the identifiers relevant to each kind.
#[derive(Debug, Clone)]
pub enum EventPayload {
    DiscoveryStarted {
        root: PathBuf,
    },
    DiscoveryFinished {
        files_found: usize,
    },
    JobAdmitted {
        job_id: String,
        path: PathBuf,
    },
    JobStarted {
        job_id: String,
        path: PathBuf,
    },
    JobProgress {
        job_id: String,
        percent: f64,
    },
    JobCompleted {
        job_id: String,
        path: PathBuf,
        input_bytes: u64,
        output_bytes: u64,
    },
    JobFailed {
        job_id: String,
        path: PathBuf,
        reason: String,
    },
    JobSkipped {
        job_id: String,
        path: PathBuf,
        reason: String,
    },
    HardwareCapabilityLimited {
        job_id: String,
        attempt: u32,
    },
    ConcurrencyLevelChanged {
        level: u32,
    },
    ShutdownRequested,
    RunFinished {
        completed: u64,
        failed: u64,
        skipped: u64,
    },
}

/// An event with its publication timestamp.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unix timestamp in milliseconds, stamped at construction.
    pub at_ms: i64,
    pub payload: EventPayload,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            at_ms: unix_millis(),
            payload,
        }
    }

    /// The kind of this event, used for handler dispatch.
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::DiscoveryStarted { .. } => EventKind::DiscoveryStarted,
            EventPayload::DiscoveryFinished { .. } => EventKind::DiscoveryFinished,
            EventPayload::JobAdmitted { .. } => EventKind::JobAdmitted,
            EventPayload::JobStarted { .. } => EventKind::JobStarted,
            EventPayload::JobProgress { .. } => EventKind::JobProgress,
            EventPayload::JobCompleted { .. } => EventKind::JobCompleted,
            EventPayload::JobFailed { .. } => EventKind::JobFailed,
            EventPayload::JobSkipped { .. } => EventKind::JobSkipped,
            EventPayload::HardwareCapabilityLimited { .. } => {
                EventKind::HardwareCapabilityLimited
            }
            EventPayload::ConcurrencyLevelChanged { .. } => EventKind::ConcurrencyLevelChanged,
            EventPayload::ShutdownRequested => EventKind::ShutdownRequested,
            EventPayload::RunFinished { .. } => EventKind::RunFinished,
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

/// Registry of per-kind event handlers with synchronous fan-out.
///
/// Handler lists are append-only; `publish` invokes handlers in registration
/// order on the caller's task. Bus state lives only for the run.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().expect("event registry poisoned");
        handlers.entry(kind).or_default().push(Box::new(handler));
    }

    /// Invoke all handlers registered for the event's kind, in registration
    /// order, on the current task.
    pub fn publish(&self, event: &Event) {
        let handlers = self.handlers.read().expect("event registry poisoned");
        if let Some(list) = handlers.get(&event.kind()) {
            for handler in list {
                handler(event);
            }
        }
    }

    /// Number of handlers registered for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.read().expect("event registry poisoned");
        handlers.get(&kind).map(|l| l.len()).unwrap_or(0)
    }
}
