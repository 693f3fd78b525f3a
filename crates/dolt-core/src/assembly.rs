//! Context assembly: render whatever is currently active.
//!
//! Assembly never selects or mutates. It reads active-lane membership per
//! level, trims to the lane budget (newest content kept), and
//! lays records out `bindle -> leaf -> turn`, each lane oldest to newest by
//! `(event_ts_ms, pointer)`.

use dolt_state::{DoltStore, Level, Record};
use serde::{Deserialize, Serialize};

use crate::error::{require_session_id, Result};
use crate::frontmatter::parse_bindle_payload;
use crate::hydration::select_lane_by_recency;
use crate::lanes::{
    available_tokens, resolve_lane_budgets, resolve_lane_policies, sanitize_tokens, LaneBudgets,
    LanePolicyOverrides,
};
use crate::obs;

/// Active records of one level, in render order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledLane {
    pub level: Level,
    pub budget: u64,
    pub records: Vec<Record>,
    pub token_total: u64,
    /// Active records left out because the lane budget shrank below them
    pub omitted: usize,
}

/// The ordered context for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    pub session_id: String,
    pub lanes: Vec<AssembledLane>,
    pub total_tokens: u64,
}

impl AssembledContext {
    pub fn lane(&self, level: Level) -> Option<&AssembledLane> {
        self.lanes.iter().find(|l| l.level == level)
    }

    pub fn record_count(&self) -> usize {
        self.lanes.iter().map(|l| l.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Concatenate every record's rendered text, blank line separated.
    pub fn render(&self) -> String {
        self.lanes
            .iter()
            .flat_map(|lane| lane.records.iter())
            .map(render_record)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn render_record(record: &Record) -> String {
    if record.level != Level::Bindle {
        return record.payload.clone();
    }
    match parse_bindle_payload(&record.payload) {
        Ok((fm, body)) => format!(
            "[bindle {} covering {}..{}, {} children{}]\n{}",
            record.pointer,
            fm.dates_covered.start_epoch_ms,
            fm.dates_covered.end_epoch_ms,
            fm.children.len(),
            if fm.finalized_at_reset {
                ", finalized at reset"
            } else {
                ""
            },
            body
        ),
        Err(err) => {
            obs::emit_frontmatter_fallback(&record.pointer, &err);
            record.payload.clone()
        }
    }
}

/// Assemble the active records of `session_id` under `budgets`.
pub async fn assemble(
    store: &dyn DoltStore,
    session_id: &str,
    budgets: &LaneBudgets,
) -> Result<AssembledContext> {
    let session_id = require_session_id(session_id)?;
    let mut lanes = Vec::with_capacity(Level::ALL.len());
    let mut total_tokens = 0u64;

    for level in Level::ALL {
        let budget = budgets.get(level);
        let mut active: Vec<Record> = store
            .list_active_records(&session_id, level)
            .await?
            .into_iter()
            .map(|a| a.record)
            .collect();
        active.sort_by(|a, b| {
            b.event_ts_ms
                .cmp(&a.event_ts_ms)
                .then_with(|| b.pointer.cmp(&a.pointer))
        });

        let mut records = select_lane_by_recency(&active, budget);
        let omitted = active.len() - records.len();
        records.reverse();

        let token_total = records
            .iter()
            .map(|r| r.token_count)
            .fold(0, u64::saturating_add);
        total_tokens = total_tokens.saturating_add(token_total);
        lanes.push(AssembledLane {
            level,
            budget,
            records,
            token_total,
            omitted,
        });
    }

    Ok(AssembledContext {
        session_id,
        lanes,
        total_tokens,
    })
}

/// Resolve budgets from raw inputs, then [`assemble`].
pub async fn assemble_for_session(
    store: &dyn DoltStore,
    session_id: &str,
    token_budget: Option<f64>,
    runtime_reserve_tokens: Option<f64>,
    overrides: Option<&LanePolicyOverrides>,
) -> Result<AssembledContext> {
    let available = available_tokens(
        sanitize_tokens(token_budget),
        sanitize_tokens(runtime_reserve_tokens),
    );
    let budgets = resolve_lane_budgets(available, &resolve_lane_policies(overrides));
    assemble(store, session_id, &budgets).await
}
