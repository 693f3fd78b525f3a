//! Bootstrap hydration.
//!
//! For each level in priority order the lane budget is resolved, the newest
//! records that fit are selected by a strict prefix scan, and the lane's
//! active set is replaced wholesale with that selection. Assembly runs last.
//!
//! Hydration is idempotent but not incremental: running it twice with no
//! writes in between activates the same pointers.

use dolt_state::{DoltStore, LaneActivation, Level, Pointer, Record};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{warn, Instrument};

use crate::assembly::{assemble, AssembledContext};
use crate::error::{normalize_session_key, require_session_id, Result};
use crate::lanes::{
    available_tokens, resolve_lane_budgets, resolve_lane_policies, sanitize_tokens, LaneBudgets,
    LanePolicyOverrides,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::telemetry::{emit_best_effort, TelemetryEvent, TelemetrySink, HYDRATION_EVENT};

/// Input to [`hydrate`].
///
/// Numbers are raw `f64` on purpose: they are coerced, never rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrateRequest {
    pub session_id: String,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub token_budget: Option<f64>,
    #[serde(default)]
    pub runtime_reserve_tokens: Option<f64>,
    #[serde(default)]
    pub lane_policies: Option<LanePolicyOverrides>,
}

impl HydrateRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    pub fn with_token_budget(mut self, tokens: f64) -> Self {
        self.token_budget = Some(tokens);
        self
    }

    pub fn with_runtime_reserve(mut self, tokens: f64) -> Self {
        self.runtime_reserve_tokens = Some(tokens);
        self
    }

    pub fn with_lane_policies(mut self, overrides: LanePolicyOverrides) -> Self {
        self.lane_policies = Some(overrides);
        self
    }
}

/// Pointers per level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPointers {
    pub bindle: Vec<Pointer>,
    pub leaf: Vec<Pointer>,
    pub turn: Vec<Pointer>,
}

impl LevelPointers {
    pub fn get(&self, level: Level) -> &[Pointer] {
        match level {
            Level::Bindle => &self.bindle,
            Level::Leaf => &self.leaf,
            Level::Turn => &self.turn,
        }
    }

    fn set(&mut self, level: Level, pointers: Vec<Pointer>) {
        match level {
            Level::Bindle => self.bindle = pointers,
            Level::Leaf => self.leaf = pointers,
            Level::Turn => self.turn = pointers,
        }
    }

    pub fn total(&self) -> usize {
        self.bindle.len() + self.leaf.len() + self.turn.len()
    }
}

/// Outcome of [`hydrate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationResult {
    /// True iff at least one pointer was activated at any level
    pub hydrated: bool,
    /// Sorted ascending by `(event_ts_ms, pointer)` per level
    pub activated_pointers: LevelPointers,
    pub available_tokens: u64,
    pub budgets: LaneBudgets,
    pub assembly: AssembledContext,
}

/// Walk `newest_first` and keep records while the running total fits `budget`.
///
/// Stops at the first record that would overflow; smaller records behind it
/// are not considered. A zero budget selects nothing.
pub fn select_lane_by_recency(newest_first: &[Record], budget: u64) -> Vec<Record> {
    let mut selected = Vec::new();
    if budget == 0 {
        return selected;
    }
    let mut used = 0u64;
    for record in newest_first {
        let next = used.saturating_add(record.token_count);
        if next > budget {
            break;
        }
        used = next;
        selected.push(record.clone());
    }
    selected
}

/// Replace the active set of one lane with `selected`.
///
/// Each activation takes `last_event_ts_ms = event_ts_ms`.
pub async fn upsert_hydrated_lane(
    store: &dyn DoltStore,
    session_id: &str,
    session_key: Option<&str>,
    level: Level,
    selected: &[Record],
) -> Result<()> {
    let activations: Vec<LaneActivation> = selected
        .iter()
        .map(|r| LaneActivation {
            pointer: r.pointer.clone(),
            last_event_ts_ms: r.event_ts_ms,
        })
        .collect();
    store
        .replace_active_lane(session_id, session_key, level, &activations)
        .await?;
    Ok(())
}

/// Hydrate every lane of a session and assemble the result.
pub async fn hydrate(
    store: &dyn DoltStore,
    sink: &dyn TelemetrySink,
    request: &HydrateRequest,
) -> Result<HydrationResult> {
    let session_id = require_session_id(&request.session_id)?;
    let session_key = normalize_session_key(request.session_key.as_deref());
    let span = obs::session_span(&session_id, "hydrate");
    hydrate_session(store, sink, request, session_id, session_key)
        .instrument(span)
        .await
}

async fn hydrate_session(
    store: &dyn DoltStore,
    sink: &dyn TelemetrySink,
    request: &HydrateRequest,
    session_id: String,
    session_key: Option<String>,
) -> Result<HydrationResult> {
    let available = available_tokens(
        sanitize_tokens(request.token_budget),
        sanitize_tokens(request.runtime_reserve_tokens),
    );
    let policies = resolve_lane_policies(request.lane_policies.as_ref());
    let budgets = resolve_lane_budgets(available, &policies);

    let mut activated = LevelPointers::default();
    for level in Level::ALL {
        let budget = budgets.get(level);
        let newest_first = store
            .list_records_by_session(&session_id, level, true)
            .await?;
        let selected = select_lane_by_recency(&newest_first, budget);
        upsert_hydrated_lane(store, &session_id, session_key.as_deref(), level, &selected)
            .await?;
        obs::emit_lane_activated(&session_id, level, budget, selected.len());

        // selected is newest-first; reversing gives ascending (event_ts_ms, pointer)
        activated.set(level, selected.into_iter().rev().map(|r| r.pointer).collect());
    }

    let assembly = assemble(store, &session_id, &budgets).await?;
    let hydrated = activated.total() > 0;

    METRICS.record_hydration(activated.total() as u64);
    obs::emit_hydration_completed(&session_id, available, activated.total(), hydrated);

    let snapshot = match store.active_lane_snapshot(&session_id).await {
        Ok(snapshot) => serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
        Err(err) => {
            warn!(
                session_id = %session_id,
                error = %err,
                "active lane snapshot unavailable for telemetry"
            );
            serde_json::Value::Null
        }
    };
    emit_best_effort(
        sink,
        TelemetryEvent::new(
            HYDRATION_EVENT,
            session_id.clone(),
            session_key,
            json!({
                "hydrated": hydrated,
                "availableTokens": available,
                "budgets": budgets,
                "activatedCounts": {
                    "bindle": activated.bindle.len(),
                    "leaf": activated.leaf.len(),
                    "turn": activated.turn.len(),
                },
                "activeLaneSnapshot": snapshot,
            }),
        ),
    );

    Ok(HydrationResult {
        hydrated,
        activated_pointers: activated,
        available_tokens: available,
        budgets,
        assembly,
    })
}
