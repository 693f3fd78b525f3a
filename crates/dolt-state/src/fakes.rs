//! In-memory fake for the storage contract
//!
//! `MemoryDoltStore` satisfies [`DoltStore`] without external dependencies.
//! Every method takes one lock, so `replace_active_lane` is atomic here.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::error::StorageError;
use crate::storage_traits::*;

type LaneKey = (String, Level, Pointer);

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<Pointer, Record>,
    lanes: HashMap<LaneKey, ActiveLaneEntry>,
}

impl Inner {
    fn deactivate(&mut self, session_id: &str, level: Level) {
        for entry in self.lanes.values_mut() {
            if entry.session_id == session_id && entry.level == level {
                entry.is_active = false;
            }
        }
    }

    fn put_lane(&mut self, entry: ActiveLaneEntry) {
        let key = (entry.session_id.clone(), entry.level, entry.pointer.clone());
        self.lanes.insert(key, entry);
    }
}

/// In-memory record and active-lane store.
#[derive(Debug, Default)]
pub struct MemoryDoltStore {
    inner: Mutex<Inner>,
}

impl MemoryDoltStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store poisoned: {e}")))
    }

    /// Number of persisted records across all sessions.
    pub fn record_count(&self) -> StorageResult<usize> {
        Ok(self.lock()?.records.len())
    }

    /// Raw lane entry, active or not.
    pub fn lane_entry(
        &self,
        session_id: &str,
        level: Level,
        pointer: &Pointer,
    ) -> StorageResult<Option<ActiveLaneEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .lanes
            .get(&(session_id.to_string(), level, pointer.clone()))
            .cloned())
    }
}

#[async_trait]
impl DoltStore for MemoryDoltStore {
    async fn upsert_record(&self, record: NewRecord) -> StorageResult<Record> {
        let mut record = record.resolve(Utc::now())?;
        let mut inner = self.lock()?;
        if let Some(existing) = inner.records.get(&record.pointer) {
            record.created_at = existing.created_at;
        }
        inner.records.insert(record.pointer.clone(), record.clone());
        Ok(record)
    }

    async fn get_record(&self, pointer: &Pointer) -> StorageResult<Option<Record>> {
        Ok(self.lock()?.records.get(pointer).cloned())
    }

    async fn list_records_by_session(
        &self,
        session_id: &str,
        level: Level,
        newest_first: bool,
    ) -> StorageResult<Vec<Record>> {
        let inner = self.lock()?;
        let mut rows: Vec<Record> = inner
            .records
            .values()
            .filter(|r| r.session_id == session_id && r.level == level)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.event_ts_ms
                .cmp(&b.event_ts_ms)
                .then_with(|| a.pointer.cmp(&b.pointer))
        });
        if newest_first {
            rows.reverse();
        }
        Ok(rows)
    }

    async fn upsert_active_lane(&self, entry: ActiveLaneEntry) -> StorageResult<()> {
        self.lock()?.put_lane(entry);
        Ok(())
    }

    async fn deactivate_level_pointers(
        &self,
        session_id: &str,
        level: Level,
    ) -> StorageResult<()> {
        self.lock()?.deactivate(session_id, level);
        Ok(())
    }

    async fn list_active_records(
        &self,
        session_id: &str,
        level: Level,
    ) -> StorageResult<Vec<ActiveRecord>> {
        let inner = self.lock()?;
        let mut out = Vec::new();
        for lane in inner
            .lanes
            .values()
            .filter(|e| e.is_active && e.session_id == session_id && e.level == level)
        {
            match inner.records.get(&lane.pointer) {
                Some(record) => out.push(ActiveRecord {
                    record: record.clone(),
                    lane: lane.clone(),
                }),
                None => warn!(pointer = %lane.pointer, "active lane entry without record"),
            }
        }
        Ok(out)
    }

    async fn list_sessions(&self) -> StorageResult<Vec<String>> {
        let inner = self.lock()?;
        let sessions: BTreeSet<String> = inner
            .records
            .values()
            .map(|r| r.session_id.clone())
            .collect();
        Ok(sessions.into_iter().collect())
    }

    async fn replace_active_lane(
        &self,
        session_id: &str,
        session_key: Option<&str>,
        level: Level,
        activations: &[LaneActivation],
    ) -> StorageResult<()> {
        let mut inner = self.lock()?;
        inner.deactivate(session_id, level);
        for activation in activations {
            inner.put_lane(ActiveLaneEntry {
                session_id: session_id.to_string(),
                session_key: session_key.map(str::to_string),
                level,
                pointer: activation.pointer.clone(),
                is_active: true,
                last_event_ts_ms: activation.last_event_ts_ms,
            });
        }
        Ok(())
    }
}
