//! Structured cycle events
//!
//! The orchestrator and session manager report what they did through an
//! [`EventSink`]. The default sink turns each event into one log line; tests
//! record them instead.

use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Something that happened during a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleEvent {
    LoginFailed {
        error: String,
        cooldown: Duration,
    },
    SessionUnavailable,
    SnapshotFailed {
        namespace: String,
        error: String,
    },
    AppMissing {
        app: String,
    },
    DemandSampled {
        app: String,
        kind: &'static str,
        demand: f64,
        surge_queue_length: f64,
    },
    MetricFailed {
        app: String,
        kind: &'static str,
        error: String,
    },
    Unchanged {
        app: String,
        instances: u32,
    },
    Scaled {
        app: String,
        from: u32,
        to: u32,
    },
    ScaleFailed {
        app: String,
        from: u32,
        to: u32,
        error: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CycleEvent);
}

/// Writes every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &CycleEvent) {
        match event {
            CycleEvent::LoginFailed { error, cooldown } => {
                error!(
                    error = %error,
                    cooldown_secs = cooldown.as_secs(),
                    "Failed to authenticate, waiting before next attempt"
                );
            }
            CycleEvent::SessionUnavailable => {
                warn!("No platform session available, skipping cycle");
            }
            CycleEvent::SnapshotFailed { namespace, error } => {
                error!(namespace = %namespace, error = %error, "Failed to list apps");
            }
            CycleEvent::AppMissing { app } => {
                info!(app = %app, "Application does not exist");
            }
            CycleEvent::DemandSampled {
                app,
                kind,
                demand,
                surge_queue_length,
            } => {
                info!(
                    app = %app,
                    kind = %kind,
                    demand = demand,
                    surge_queue_length = surge_queue_length,
                    "Recorded demand"
                );
            }
            CycleEvent::MetricFailed { app, kind, error } => {
                error!(app = %app, kind = %kind, error = %error, "Failed to sample demand");
            }
            CycleEvent::Unchanged { app, instances } => {
                debug!(app = %app, instances = instances, "Instance count unchanged");
            }
            CycleEvent::Scaled { app, from, to } => {
                info!(app = %app, from = from, to = to, "Scaled application");
            }
            CycleEvent::ScaleFailed {
                app,
                from,
                to,
                error,
            } => {
                error!(
                    app = %app,
                    from = from,
                    to = to,
                    error = %error,
                    "Failed to scale application"
                );
            }
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<CycleEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &CycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
