//! Global atomic counters for Dolt observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    hydrations: AtomicU64,
    records_activated: AtomicU64,
    eviction_runs: AtomicU64,
    records_evicted: AtomicU64,
    telemetry_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            hydrations: AtomicU64::new(0),
            records_activated: AtomicU64::new(0),
            eviction_runs: AtomicU64::new(0),
            records_evicted: AtomicU64::new(0),
            telemetry_failures: AtomicU64::new(0),
        }
    }

    /// Count one completed hydration and the records it activated.
    pub fn record_hydration(&self, activated: u64) {
        self.hydrations.fetch_add(1, Ordering::Relaxed);
        self.records_activated.fetch_add(activated, Ordering::Relaxed);
        tracing::trace!(metric = "hydrations", "counter incremented");
    }

    /// Count one eviction run and the records it deactivated.
    pub fn record_eviction(&self, evicted: u64) {
        self.eviction_runs.fetch_add(1, Ordering::Relaxed);
        self.records_evicted.fetch_add(evicted, Ordering::Relaxed);
        tracing::trace!(metric = "eviction_runs", "counter incremented");
    }

    pub fn inc_telemetry_failures(&self) {
        self.telemetry_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "telemetry_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            hydrations = self.hydrations(),
            records_activated = self.records_activated(),
            eviction_runs = self.eviction_runs(),
            records_evicted = self.records_evicted(),
            telemetry_failures = self.telemetry_failures(),
        );
    }

    pub fn hydrations(&self) -> u64 {
        self.hydrations.load(Ordering::Relaxed)
    }

    pub fn records_activated(&self) -> u64 {
        self.records_activated.load(Ordering::Relaxed)
    }

    pub fn eviction_runs(&self) -> u64 {
        self.eviction_runs.load(Ordering::Relaxed)
    }

    pub fn records_evicted(&self) -> u64 {
        self.records_evicted.load(Ordering::Relaxed)
    }

    pub fn telemetry_failures(&self) -> u64 {
        self.telemetry_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.hydrations.store(0, Ordering::Relaxed);
        self.records_activated.store(0, Ordering::Relaxed);
        self.eviction_runs.store(0, Ordering::Relaxed);
        self.records_evicted.store(0, Ordering::Relaxed);
        self.telemetry_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.record_hydration(3);
        m.record_hydration(2);
        assert_eq!(m.hydrations(), 2);
        assert_eq!(m.records_activated(), 5);

        m.record_eviction(4);
        assert_eq!(m.eviction_runs(), 1);
        assert_eq!(m.records_evicted(), 4);

        m.inc_telemetry_failures();
        assert_eq!(m.telemetry_failures(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.record_hydration(1);
        m.record_eviction(1);
        m.inc_telemetry_failures();
        m.reset();
        assert_eq!(m.hydrations(), 0);
        assert_eq!(m.records_activated(), 0);
        assert_eq!(m.eviction_runs(), 0);
        assert_eq!(m.records_evicted(), 0);
        assert_eq!(m.telemetry_failures(), 0);
    }
}
