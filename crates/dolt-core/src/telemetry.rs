//! Best-effort telemetry for hydration and eviction.
//!
//! Events are handed to a [`TelemetrySink`]. Sink failures are logged and
//! counted, never propagated: [`emit_best_effort`] is the only way the engine
//! emits.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::metrics::METRICS;
use crate::obs;

/// Emitted once per bootstrap hydration.
pub const HYDRATION_EVENT: &str = "dolt_bootstrap_hydration";

/// Emitted once per eviction run, with the per-step trail.
pub const EVICTION_EVENT: &str = "dolt_lane_eviction";

/// One telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub session_id: String,
    pub session_key: Option<String>,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(
        event_type: impl Into<String>,
        session_id: impl Into<String>,
        session_key: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            session_id: session_id.into(),
            session_key,
            payload,
            emitted_at: Utc::now(),
        }
    }
}

/// Errors a sink may report.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry sink rejected event: {0}")]
    Rejected(String),

    #[error("telemetry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;
}

/// Emit through `sink`, swallowing failures. Returns whether the sink accepted it.
pub fn emit_best_effort(sink: &dyn TelemetrySink, event: TelemetryEvent) -> bool {
    match sink.emit(&event) {
        Ok(()) => true,
        Err(err) => {
            METRICS.inc_telemetry_failures();
            obs::emit_telemetry_dropped(&event.session_id, &event.event_type, &err);
            false
        }
    }
}

/// Writes each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let payload = serde_json::to_string(&event.payload)?;
        info!(
            event = %event.event_type,
            event_id = %event.event_id,
            session_id = %event.session_id,
            session_key = event.session_key.as_deref().unwrap_or(""),
            payload = %payload,
            "telemetry"
        );
        Ok(())
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, event_type: &str) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.events
            .lock()
            .map_err(|e| TelemetryError::Rejected(e.to_string()))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    impl TelemetrySink for BrokenSink {
        fn emit(&self, _event: &TelemetryEvent) -> Result<(), TelemetryError> {
            Err(TelemetryError::Rejected("pipeline offline".into()))
        }
    }

    #[test]
    fn recording_sink_keeps_events_in_order() {
        let sink = RecordingSink::new();
        for kind in ["a", "b", "a"] {
            assert!(emit_best_effort(
                &sink,
                TelemetryEvent::new(kind, "s1", None, serde_json::json!({}))
            ));
        }
        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.events_of("a").len(), 2);
    }

    #[test]
    fn failures_are_swallowed() {
        let accepted = emit_best_effort(
            &BrokenSink,
            TelemetryEvent::new(HYDRATION_EVENT, "s1", None, serde_json::json!({})),
        );
        assert!(!accepted);
    }

    #[test]
    fn tracing_and_noop_sinks_accept() {
        let event = TelemetryEvent::new(
            EVICTION_EVENT,
            "s1",
            Some("k".into()),
            serde_json::json!({"n": 1}),
        );
        assert!(TracingSink.emit(&event).is_ok());
        assert!(NoopSink.emit(&event).is_ok());
    }
}
