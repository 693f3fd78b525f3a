//! Oldest-first eviction for one active lane.
//!
//! While the lane's active token total exceeds the target, the entry with the
//! smallest `(last_event_ts_ms, pointer)` is deactivated, one at a time, and
//! the total is re-checked. Activation recency is the key, not content time.
//! Records are never touched; only their lane membership flips.
//!
//! Implemented for any level. Bindles are the production caller, see
//! [`evict_bindles`].

use std::collections::HashMap;

use dolt_state::{ActiveLaneEntry, DoltStore, LaneIndex, Level, OrderedLaneIndex, Pointer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;

use crate::error::{require_session_id, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::telemetry::{emit_best_effort, TelemetryEvent, TelemetrySink, EVICTION_EVENT};

/// Lane state at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionSnapshot {
    pub total_tokens: u64,
    pub active_count: usize,
    /// Active entry with the smallest `(last_event_ts_ms, pointer)`
    pub oldest: Option<Pointer>,
    /// Active entry with the largest `(last_event_ts_ms, pointer)`
    pub newest: Option<Pointer>,
}

impl EvictionSnapshot {
    fn of(index: &dyn LaneIndex) -> Self {
        Self {
            total_tokens: index.total_tokens(),
            active_count: index.len(),
            oldest: index.oldest().map(|e| e.pointer),
            newest: index.newest().map(|e| e.pointer),
        }
    }
}

/// One deactivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionStep {
    pub pointer: Pointer,
    pub last_event_ts_ms: i64,
    pub token_count: u64,
    pub before_count: usize,
    pub before_tokens: u64,
    pub after_count: usize,
    pub after_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionTelemetry {
    pub before: EvictionSnapshot,
    pub after: EvictionSnapshot,
    pub steps: Vec<EvictionStep>,
}

/// Outcome of [`evict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionOutcome {
    pub session_id: String,
    pub level: Level,
    pub target_tokens: u64,
    /// Oldest evicted first
    pub evicted_pointers: Vec<Pointer>,
    /// Remaining active set, newest first
    pub active_pointers: Vec<Pointer>,
    pub telemetry: EvictionTelemetry,
}

impl EvictionOutcome {
    pub fn fits(&self) -> bool {
        self.telemetry.after.total_tokens <= self.target_tokens
    }
}

/// Shrink the `(session_id, level)` active lane until it holds at most `target_tokens`.
pub async fn evict(
    store: &dyn DoltStore,
    sink: &dyn TelemetrySink,
    session_id: &str,
    level: Level,
    target_tokens: u64,
) -> Result<EvictionOutcome> {
    let session_id = require_session_id(session_id)?;
    let span = obs::session_span(&session_id, "evict");
    evict_lane(store, sink, session_id, level, target_tokens)
        .instrument(span)
        .await
}

/// [`evict`] for the bindle lane.
pub async fn evict_bindles(
    store: &dyn DoltStore,
    sink: &dyn TelemetrySink,
    session_id: &str,
    target_tokens: u64,
) -> Result<EvictionOutcome> {
    evict(store, sink, session_id, Level::Bindle, target_tokens).await
}

async fn evict_lane(
    store: &dyn DoltStore,
    sink: &dyn TelemetrySink,
    session_id: String,
    level: Level,
    target_tokens: u64,
) -> Result<EvictionOutcome> {
    let active = store.list_active_records(&session_id, level).await?;
    let mut index = OrderedLaneIndex::from_active(&active);
    let session_key = active.iter().find_map(|a| a.lane.session_key.clone());
    let mut lanes: HashMap<Pointer, ActiveLaneEntry> = active
        .into_iter()
        .map(|a| (a.record.pointer, a.lane))
        .collect();

    let before = EvictionSnapshot::of(&index);
    let mut steps = Vec::new();
    let mut evicted = Vec::new();

    while index.total_tokens() > target_tokens {
        let before_count = index.len();
        let before_tokens = index.total_tokens();
        let Some(oldest) = index.pop_oldest() else {
            break;
        };

        if let Some(mut entry) = lanes.remove(&oldest.pointer) {
            entry.is_active = false;
            store.upsert_active_lane(entry).await?;
        }

        obs::emit_eviction_step(
            &session_id,
            level,
            &oldest.pointer,
            before_tokens,
            index.total_tokens(),
        );
        steps.push(EvictionStep {
            pointer: oldest.pointer.clone(),
            last_event_ts_ms: oldest.last_event_ts_ms,
            token_count: oldest.token_count,
            before_count,
            before_tokens,
            after_count: index.len(),
            after_tokens: index.total_tokens(),
        });
        evicted.push(oldest.pointer);
    }

    let after = EvictionSnapshot::of(&index);
    let active_pointers: Vec<Pointer> = index
        .entries_oldest_first()
        .into_iter()
        .rev()
        .map(|e| e.pointer)
        .collect();

    METRICS.record_eviction(evicted.len() as u64);
    obs::emit_eviction_completed(
        &session_id,
        level,
        evicted.len(),
        after.total_tokens,
        target_tokens,
    );

    let outcome = EvictionOutcome {
        session_id,
        level,
        target_tokens,
        evicted_pointers: evicted,
        active_pointers,
        telemetry: EvictionTelemetry {
            before,
            after,
            steps,
        },
    };

    emit_best_effort(
        sink,
        TelemetryEvent::new(
            EVICTION_EVENT,
            outcome.session_id.clone(),
            session_key,
            json!({
                "level": level,
                "targetTokens": target_tokens,
                "evictedPointers": outcome.evicted_pointers,
                "activePointers": outcome.active_pointers,
                "before": outcome.telemetry.before,
                "after": outcome.telemetry.after,
                "steps": outcome.telemetry.steps,
            }),
        ),
    );

    Ok(outcome)
}
