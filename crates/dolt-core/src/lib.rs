//! Dolt-Core: Token-Budgeted Context Engine
//!
//! Hierarchical conversation memory with three levels, `bindle > leaf > turn`.
//! Records live in a [`dolt_state::DoltStore`]; this crate decides which of
//! them are active for a session and renders the active set as context.
//!
//! ## Key Components
//!
//! - `lanes`: per-level budget split of the available tokens
//! - `hydration`: bootstrap selection of the newest records that fit
//! - `eviction`: oldest-first deactivation down to a token target
//! - `assembly`: read-only rendering of the active lanes
//! - `frontmatter` / `rollup`: bindle summaries with provenance
//! - `telemetry`: best-effort event sinks
//! - `engine`: `ContextEngine`, per-lane serialized facade

pub mod assembly;
pub mod config;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod frontmatter;
pub mod hydration;
pub mod lanes;
pub mod logging;
pub mod metrics;
pub mod obs;
pub mod rollup;
pub mod telemetry;

pub use assembly::{assemble, assemble_for_session, AssembledContext, AssembledLane};
pub use config::DoltConfig;
pub use engine::ContextEngine;
pub use error::{DoltError, Result};
pub use eviction::{
    evict, evict_bindles, EvictionOutcome, EvictionSnapshot, EvictionStep, EvictionTelemetry,
};
pub use frontmatter::{
    compose_bindle_payload, parse_bindle_payload, rollup_frontmatter, serialize_frontmatter,
    BindleFrontmatter, DatesCovered, FrontmatterError,
};
pub use hydration::{
    hydrate, select_lane_by_recency, upsert_hydrated_lane, HydrateRequest, HydrationResult,
    LevelPointers,
};
pub use lanes::{
    available_tokens, resolve_lane_budgets, resolve_lane_policies, sanitize_tokens, LaneBudgets,
    LanePolicies, LanePolicy, LanePolicyOverride, LanePolicyOverrides,
};
pub use logging::init_tracing;
pub use metrics::METRICS;
pub use rollup::{rollup_bindle, BindleRollup};
pub use telemetry::{
    emit_best_effort, NoopSink, RecordingSink, TelemetryError, TelemetryEvent, TelemetrySink,
    TracingSink, EVICTION_EVENT, HYDRATION_EVENT,
};
