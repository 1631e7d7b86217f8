//! Event system for build runs
//!
//! Provides typed progress events in place of free-form log lines

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Build progress event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// The component was not marked changed
    Skipped { component: String },
    /// The component's build action is about to run
    Started { component: String },
    /// The component's build action returned
    Finished {
        component: String,
        success: bool,
        duration_ms: u64,
    },
    /// A dependency failed, so the component's action did not run
    Blocked {
        component: String,
        dependency: String,
    },
}

impl BuildEvent {
    pub fn component(&self) -> &str {
        match self {
            Self::Skipped { component }
            | Self::Started { component }
            | Self::Finished { component, .. }
            | Self::Blocked { component, .. } => component,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Started { .. } => "started",
            Self::Finished { .. } => "finished",
            Self::Blocked { .. } => "blocked",
        }
    }
}

/// Event envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEventEnvelope {
    pub version: u32,
    pub sequence: u64,
    pub run_id: String,
    pub timestamp: i64,
    pub event: BuildEvent,
}

impl BuildEventEnvelope {
    pub fn new(run_id: impl Into<String>, event: BuildEvent) -> Self {
        Self {
            version: 1,
            sequence: next_sequence(),
            run_id: run_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            event,
        }
    }
}

/// Event sink trait for emitting events
pub trait EventSink: Send + Sync {
    /// Emit an event
    fn emit(&self, envelope: &BuildEventEnvelope);
}

/// A simple logging event sink
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &BuildEventEnvelope) {
        match &envelope.event {
            BuildEvent::Skipped { component } => {
                tracing::info!("Skipping build for unchanged component: {}", component)
            }
            BuildEvent::Started { component } => tracing::info!("Building: {}", component),
            BuildEvent::Finished {
                component,
                success,
                duration_ms,
            } => tracing::info!(
                "Finished: {} (success: {}, {}ms)",
                component,
                success,
                duration_ms
            ),
            BuildEvent::Blocked {
                component,
                dependency,
            } => tracing::warn!(
                "Not building {}: dependency {} did not build",
                component,
                dependency
            ),
        }
    }
}

/// A buffering event sink that collects events
#[derive(Default)]
pub struct BufferingEventSink {
    events: Arc<RwLock<Vec<BuildEventEnvelope>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<BuildEventEnvelope> {
        self.events.read().clone()
    }

    /// Components that reached `phase`, in emission order.
    pub fn components_in_phase(&self, phase: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event.phase() == phase)
            .map(|e| e.event.component().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &BuildEventEnvelope) {
        self.events.write().push(envelope.clone());
    }
}

/// Global sequence counter for events
static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Get the next event sequence number
pub fn next_sequence() -> u64 {
    EVENT_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}
