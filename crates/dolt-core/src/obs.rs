//! Structured observability hooks for Dolt session lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans via [`session_span`]
//! - Emission functions for hydration, lane activation and eviction
//!
//! Events are emitted at `info!` level, failures at `warn!`.

use dolt_state::{Level, Pointer};
use tracing::{debug, info, warn, Span};

/// Session-scoped span for async operations.
///
/// # Example
///
/// ```ignore
/// hydrate_lanes(..).instrument(session_span("session-42", "hydrate")).await
/// ```
pub fn session_span(session_id: &str, operation: &'static str) -> Span {
    tracing::info_span!("dolt.session", session_id = %session_id, op = operation)
}

/// Emit event: a lane was replaced during hydration.
pub fn emit_lane_activated(session_id: &str, level: Level, budget: u64, activated: usize) {
    debug!(
        event = "lane.activated",
        session_id = %session_id,
        level = %level,
        budget = budget,
        activated = activated,
    );
}

/// Emit event: bootstrap hydration finished.
pub fn emit_hydration_completed(
    session_id: &str,
    available_tokens: u64,
    activated: usize,
    hydrated: bool,
) {
    info!(
        event = "hydration.completed",
        session_id = %session_id,
        available_tokens = available_tokens,
        activated = activated,
        hydrated = hydrated,
    );
}

/// Emit event: one record deactivated by the eviction loop.
pub fn emit_eviction_step(
    session_id: &str,
    level: Level,
    pointer: &Pointer,
    before_tokens: u64,
    after_tokens: u64,
) {
    debug!(
        event = "eviction.step",
        session_id = %session_id,
        level = %level,
        pointer = %pointer,
        before_tokens = before_tokens,
        after_tokens = after_tokens,
    );
}

/// Emit event: eviction converged.
pub fn emit_eviction_completed(
    session_id: &str,
    level: Level,
    evicted: usize,
    total_tokens: u64,
    target_tokens: u64,
) {
    info!(
        event = "eviction.completed",
        session_id = %session_id,
        level = %level,
        evicted = evicted,
        total_tokens = total_tokens,
        target_tokens = target_tokens,
    );
}

/// Emit event: a telemetry event was dropped (warning level).
pub fn emit_telemetry_dropped(session_id: &str, event_type: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "telemetry.dropped",
        session_id = %session_id,
        event_type = %event_type,
        error = %error,
    );
}

/// Emit event: frontmatter on an active bindle could not be parsed (warning level).
pub fn emit_frontmatter_fallback(pointer: &Pointer, error: &dyn std::fmt::Display) {
    warn!(event = "assembly.frontmatter_fallback", pointer = %pointer, error = %error);
}
