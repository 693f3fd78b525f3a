//! SurrealDB row types for the Dolt tables
//!
//! Rows are converted to and from the `storage_traits` types at the store
//! boundary; levels are stored as lowercase strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{ActiveLaneEntry, Level, Pointer, Record, StorageResult};

/// Table holding persisted records
pub const RECORDS_TABLE: &str = "dolt_records";

/// Table holding active-lane membership
pub const ACTIVE_LANE_TABLE: &str = "dolt_active_lane";

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Record row stored in `dolt_records`, keyed by pointer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub pointer: String,
    pub session_id: String,
    pub session_key: Option<String>,
    /// "bindle" | "leaf" | "turn"
    pub level: String,
    pub event_ts_ms: i64,
    pub token_count: u64,
    pub payload: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<&Record> for RecordRow {
    fn from(record: &Record) -> Self {
        RecordRow {
            id: None,
            pointer: record.pointer.as_str().to_string(),
            session_id: record.session_id.clone(),
            session_key: record.session_key.clone(),
            level: record.level.as_str().to_string(),
            event_ts_ms: record.event_ts_ms,
            token_count: record.token_count,
            payload: record.payload.clone(),
            created_at: record.created_at,
        }
    }
}

impl RecordRow {
    pub fn into_record(self) -> StorageResult<Record> {
        Ok(Record {
            pointer: Pointer::new(self.pointer),
            session_id: self.session_id,
            session_key: self.session_key,
            level: self.level.parse()?,
            event_ts_ms: self.event_ts_ms,
            token_count: self.token_count,
            payload: self.payload,
            created_at: self.created_at,
        })
    }
}

/// Active-lane row stored in `dolt_active_lane`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveLaneRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    /// Composite key `session_id/level/pointer`, also used as the record id
    pub lane_key: String,
    pub session_id: String,
    pub session_key: Option<String>,
    pub level: String,
    pub pointer: String,
    pub is_active: bool,
    pub last_event_ts_ms: i64,
}

impl ActiveLaneRow {
    pub fn lane_key(session_id: &str, level: Level, pointer: &Pointer) -> String {
        format!("{}/{}/{}", session_id, level, pointer)
    }

    pub fn into_entry(self) -> StorageResult<ActiveLaneEntry> {
        Ok(ActiveLaneEntry {
            session_id: self.session_id,
            session_key: self.session_key,
            level: self.level.parse()?,
            pointer: Pointer::new(self.pointer),
            is_active: self.is_active,
            last_event_ts_ms: self.last_event_ts_ms,
        })
    }
}

impl From<&ActiveLaneEntry> for ActiveLaneRow {
    fn from(entry: &ActiveLaneEntry) -> Self {
        ActiveLaneRow {
            id: None,
            lane_key: Self::lane_key(&entry.session_id, entry.level, &entry.pointer),
            session_id: entry.session_id.clone(),
            session_key: entry.session_key.clone(),
            level: entry.level.as_str().to_string(),
            pointer: entry.pointer.as_str().to_string(),
            is_active: entry.is_active,
            last_event_ts_ms: entry.last_event_ts_ms,
        }
    }
}
