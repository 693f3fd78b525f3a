//! `ContextEngine`: the entry point for callers that share a store.
//!
//! Hydration and eviction for the same `(session_id, level)` lane are
//! serialized in-process through per-lane async locks. Hydration takes the
//! locks of all three levels in `bindle, leaf, turn` order, eviction takes
//! only its own, so the two never deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use dolt_state::{ActiveLaneSnapshot, DoltStore, Level, NewRecord, Record};
use tokio::sync::{Mutex as LaneMutex, OwnedMutexGuard};
use tracing::debug;

use crate::assembly::{assemble_for_session, AssembledContext};
use crate::config::DoltConfig;
use crate::error::{require_session_id, Result};
use crate::eviction::{evict, EvictionOutcome};
use crate::hydration::{hydrate, HydrateRequest, HydrationResult};
use crate::rollup::{rollup_bindle, BindleRollup};
use crate::telemetry::{TelemetrySink, TracingSink};

type LaneKey = (String, Level);

/// Registry of per-lane locks. Entries live only while someone holds or
/// waits on them.
#[derive(Default)]
struct LaneLocks {
    locks: Mutex<HashMap<LaneKey, Arc<LaneMutex<()>>>>,
}

impl LaneLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<LaneKey, Arc<LaneMutex<()>>>> {
        // Entries are inserted and removed whole, so a poisoned map is still consistent.
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, session_id: &str, level: Level) -> Arc<LaneMutex<()>> {
        self.map()
            .entry((session_id.to_string(), level))
            .or_default()
            .clone()
    }

    async fn acquire(&self, session_id: &str, level: Level) -> LaneGuard<'_> {
        let mut guard = LaneGuard::new(self, session_id);
        guard.lock(level).await;
        guard
    }

    /// Acquire every level of a session in `Level::ALL` order.
    async fn acquire_all(&self, session_id: &str) -> LaneGuard<'_> {
        let mut guard = LaneGuard::new(self, session_id);
        for level in Level::ALL {
            guard.lock(level).await;
        }
        guard
    }

    /// Drop the session's entries that nobody holds or waits on.
    fn prune(&self, session_id: &str) {
        let mut locks = self.map();
        for level in Level::ALL {
            let key = (session_id.to_string(), level);
            if locks
                .get(&key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&key);
            }
        }
    }

    fn len(&self) -> usize {
        self.map().len()
    }
}

/// Lane locks held for one session. Dropping releases them, then prunes.
struct LaneGuard<'a> {
    registry: &'a LaneLocks,
    session_id: String,
    held: Vec<OwnedMutexGuard<()>>,
}

impl<'a> LaneGuard<'a> {
    fn new(registry: &'a LaneLocks, session_id: &str) -> Self {
        Self {
            registry,
            session_id: session_id.to_string(),
            held: Vec::with_capacity(Level::ALL.len()),
        }
    }

    async fn lock(&mut self, level: Level) {
        let lane = self.registry.handle(&self.session_id, level);
        self.held.push(lane.lock_owned().await);
    }
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        self.held.clear();
        self.registry.prune(&self.session_id);
    }
}

/// Store, telemetry sink and configuration behind one handle.
pub struct ContextEngine {
    store: Arc<dyn DoltStore>,
    sink: Arc<dyn TelemetrySink>,
    config: DoltConfig,
    locks: LaneLocks,
}

impl ContextEngine {
    /// Engine with default configuration.
    pub fn new(store: Arc<dyn DoltStore>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            store,
            sink,
            config: DoltConfig::default(),
            locks: LaneLocks::default(),
        }
    }

    /// Engine that logs telemetry through `tracing`.
    pub fn with_tracing_sink(store: Arc<dyn DoltStore>) -> Self {
        Self::new(store, Arc::new(TracingSink))
    }

    pub fn with_config(mut self, config: DoltConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DoltConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DoltStore> {
        &self.store
    }

    pub async fn put_record(&self, record: NewRecord) -> Result<Record> {
        Ok(self.store.upsert_record(record).await?)
    }

    pub async fn rollup_bindle(&self, rollup: &BindleRollup) -> Result<Record> {
        rollup_bindle(self.store.as_ref(), rollup).await
    }

    /// Hydrate a session, filling budget inputs the request leaves unset from
    /// the engine configuration.
    pub async fn hydrate(&self, request: HydrateRequest) -> Result<HydrationResult> {
        let session_id = require_session_id(&request.session_id)?;
        let request = self.with_config_defaults(request);

        let _guards = self.locks.acquire_all(&session_id).await;
        debug!(session_id = %session_id, "lane locks acquired for hydration");
        hydrate(self.store.as_ref(), self.sink.as_ref(), &request).await
    }

    /// Evict one lane down to `target_tokens`.
    pub async fn evict(
        &self,
        session_id: &str,
        level: Level,
        target_tokens: u64,
    ) -> Result<EvictionOutcome> {
        let session_id = require_session_id(session_id)?;
        let _guard = self.locks.acquire(&session_id, level).await;
        evict(
            self.store.as_ref(),
            self.sink.as_ref(),
            &session_id,
            level,
            target_tokens,
        )
        .await
    }

    /// Assemble under the configured budget and lane policies.
    pub async fn assemble(&self, session_id: &str) -> Result<AssembledContext> {
        let budget = &self.config.budget;
        assemble_for_session(
            self.store.as_ref(),
            session_id,
            Some(budget.token_budget),
            Some(budget.runtime_reserve_tokens),
            Some(&self.config.lanes),
        )
        .await
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<ActiveLaneSnapshot> {
        let session_id = require_session_id(session_id)?;
        Ok(self.store.active_lane_snapshot(&session_id).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.store.list_sessions().await?)
    }

    fn with_config_defaults(&self, mut request: HydrateRequest) -> HydrateRequest {
        let budget = &self.config.budget;
        request.token_budget.get_or_insert(budget.token_budget);
        request
            .runtime_reserve_tokens
            .get_or_insert(budget.runtime_reserve_tokens);
        if request.lane_policies.is_none() {
            request.lane_policies = Some(self.config.lanes);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NoopSink;
    use dolt_state::MemoryDoltStore;

    fn engine() -> ContextEngine {
        ContextEngine::new(Arc::new(MemoryDoltStore::new()), Arc::new(NoopSink))
    }

    #[test]
    fn lane_locks_are_shared_per_lane() {
        let locks = LaneLocks::default();
        let a = locks.handle("s1", Level::Turn);
        let b = locks.handle("s1", Level::Turn);
        let c = locks.handle("s1", Level::Leaf);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn config_fills_unset_budget_only() {
        let mut config = DoltConfig::default();
        config.budget.token_budget = 500.0;
        config.budget.runtime_reserve_tokens = 50.0;
        let engine = engine().with_config(config);

        let request = HydrateRequest::new("s1").with_token_budget(90.0);
        let filled = engine.with_config_defaults(request);
        assert_eq!(filled.token_budget, Some(90.0));
        assert_eq!(filled.runtime_reserve_tokens, Some(50.0));
        assert!(filled.lane_policies.is_some());
    }

    #[tokio::test]
    async fn evict_waits_for_held_lane_lock() {
        let engine = Arc::new(engine());
        let guard = engine.locks.acquire("s1", Level::Bindle).await;

        let pending = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.evict("s1", Level::Bindle, 0).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(guard);
        let outcome = pending.await.unwrap().unwrap();
        assert!(outcome.evicted_pointers.is_empty());
    }

    #[tokio::test]
    async fn released_lanes_leave_the_registry() {
        let locks = LaneLocks::default();
        let turn = locks.acquire("s1", Level::Turn).await;
        let leaf = locks.acquire("s1", Level::Leaf).await;
        assert_eq!(locks.len(), 2);

        drop(leaf);
        assert_eq!(locks.len(), 1);
        drop(turn);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn waiter_keeps_lane_entry_alive() {
        let locks = Arc::new(LaneLocks::default());
        let held = locks.acquire("s1", Level::Bindle).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("s1", Level::Bindle).await;
            })
        };
        tokio::task::yield_now().await;

        drop(held);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn idle_sessions_do_not_accumulate_locks() {
        let engine = engine();
        for i in 0..200 {
            let session_id = format!("s{i}");
            engine
                .hydrate(HydrateRequest::new(session_id.as_str()))
                .await
                .unwrap();
            engine.evict(&session_id, Level::Turn, 0).await.unwrap();
        }
        assert_eq!(engine.locks.len(), 0);
    }

    #[tokio::test]
    async fn blank_session_rejected_before_locking() {
        let engine = engine();
        assert!(engine.hydrate(HydrateRequest::new(" ")).await.is_err());
        assert!(engine.evict("", Level::Leaf, 0).await.is_err());
        assert_eq!(engine.locks.len(), 0);
    }
}
