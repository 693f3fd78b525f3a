//! Storage contract for the Dolt context engine
//!
//! Two relations live behind [`DoltStore`]:
//! - records: durable, append-or-replace units of context (`bindle`, `leaf`, `turn`)
//! - active lanes: per `(session_id, level, pointer)` activation membership
//!
//! Records are never deleted through this contract. Activation state is
//! toggled independently of the record it points at.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

/// Position of a record in the rollup hierarchy.
///
/// Declaration order is priority order: bindle outranks leaf, leaf outranks
/// turn when tokens are scarce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Top-tier rollup of leaves
    Bindle,
    /// Mid-tier rollup of turns
    Leaf,
    /// Raw conversational exchange
    Turn,
}

impl Level {
    /// All levels in priority order.
    pub const ALL: [Level; 3] = [Level::Bindle, Level::Leaf, Level::Turn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Bindle => "bindle",
            Level::Leaf => "leaf",
            Level::Turn => "turn",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bindle" => Ok(Level::Bindle),
            "leaf" => Ok(Level::Leaf),
            "turn" => Ok(Level::Turn),
            other => Err(StorageError::InvalidRecord(format!("unknown level: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Pointer
// ---------------------------------------------------------------------------

/// Opaque, stable identifier of a record.
///
/// Ordering is plain byte order on the inner string and serves as the
/// deterministic tie-break wherever two records share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pointer(String);

impl Pointer {
    pub fn new(value: impl Into<String>) -> Self {
        Pointer(value.into())
    }

    /// Derive a pointer from record content: `{level}-{16 hex chars}`.
    pub fn derive(session_id: &str, level: Level, event_ts_ms: i64, payload: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(level.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(event_ts_ms.to_be_bytes());
        hasher.update(payload.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Pointer(format!("{}-{}", level, &digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Pointer {
    fn from(s: &str) -> Self {
        Pointer(s.to_string())
    }
}

impl From<String> for Pointer {
    fn from(s: String) -> Self {
        Pointer(s)
    }
}

/// Rough token estimate used when a writer does not supply a count.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One persisted unit of context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub pointer: Pointer,
    pub session_id: String,
    pub session_key: Option<String>,
    pub level: Level,
    /// Content time of the underlying event, not activation time
    pub event_ts_ms: i64,
    pub token_count: u64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Input to [`DoltStore::upsert_record`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub pointer: Option<Pointer>,
    pub session_id: String,
    pub session_key: Option<String>,
    pub level: Level,
    pub event_ts_ms: i64,
    pub payload: String,
    pub token_count: Option<u64>,
}

impl NewRecord {
    pub fn new(
        session_id: impl Into<String>,
        level: Level,
        event_ts_ms: i64,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            pointer: None,
            session_id: session_id.into(),
            session_key: None,
            level,
            event_ts_ms,
            payload: payload.into(),
            token_count: None,
        }
    }

    pub fn with_pointer(mut self, pointer: impl Into<Pointer>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    pub fn with_token_count(mut self, tokens: u64) -> Self {
        self.token_count = Some(tokens);
        self
    }

    /// Validate and fill in derived fields, producing the record to persist.
    ///
    /// Fails on a blank session id or a blank explicit pointer. Session key is
    /// trimmed and dropped when empty.
    pub fn resolve(self, created_at: DateTime<Utc>) -> StorageResult<Record> {
        let session_id = self.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(StorageError::InvalidRecord(
                "session_id must not be empty".to_string(),
            ));
        }

        let pointer = match self.pointer {
            Some(p) if p.as_str().trim().is_empty() => {
                return Err(StorageError::InvalidRecord(
                    "pointer must not be empty".to_string(),
                ))
            }
            Some(p) => p,
            None => Pointer::derive(&session_id, self.level, self.event_ts_ms, &self.payload),
        };

        let session_key = self
            .session_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let token_count = self
            .token_count
            .unwrap_or_else(|| estimate_tokens(&self.payload));

        Ok(Record {
            pointer,
            session_id,
            session_key,
            level: self.level,
            event_ts_ms: self.event_ts_ms,
            token_count,
            payload: self.payload,
            created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Active lanes
// ---------------------------------------------------------------------------

/// Activation membership of one record in its `(session_id, level)` lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLaneEntry {
    pub session_id: String,
    pub session_key: Option<String>,
    pub level: Level,
    pub pointer: Pointer,
    pub is_active: bool,
    /// Activation recency; the only ordering key eviction looks at
    pub last_event_ts_ms: i64,
}

/// A pointer to activate together with its activation recency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneActivation {
    pub pointer: Pointer,
    pub last_event_ts_ms: i64,
}

/// An active lane entry joined with the record it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRecord {
    pub record: Record,
    pub lane: ActiveLaneEntry,
}

impl ActiveRecord {
    /// Eviction order key: `(last_event_ts_ms, pointer)`.
    pub fn recency_key(&self) -> (i64, &Pointer) {
        (self.lane.last_event_ts_ms, &self.record.pointer)
    }
}

/// Count and token total of the active records in one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneStats {
    pub record_count: u64,
    pub token_total: u64,
}

/// Per-level [`LaneStats`] for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLaneSnapshot {
    pub bindle: LaneStats,
    pub leaf: LaneStats,
    pub turn: LaneStats,
}

impl ActiveLaneSnapshot {
    pub fn get(&self, level: Level) -> LaneStats {
        match level {
            Level::Bindle => self.bindle,
            Level::Leaf => self.leaf,
            Level::Turn => self.turn,
        }
    }

    pub fn set(&mut self, level: Level, stats: LaneStats) {
        match level {
            Level::Bindle => self.bindle = stats,
            Level::Leaf => self.leaf = stats,
            Level::Turn => self.turn = stats,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        [self.bindle, self.leaf, self.turn]
            .iter()
            .map(|stats| stats.token_total)
            .fold(0, u64::saturating_add)
    }
}

// ---------------------------------------------------------------------------
// DoltStore
// ---------------------------------------------------------------------------

/// Durable record and active-lane store.
///
/// Guarantees:
/// - `upsert_record` never removes other records; no method deletes a record.
/// - `list_records_by_session` orders by `(event_ts_ms, pointer)`, exactly
///   reversed when `newest_first` is set.
/// - `list_active_records` returns only entries with `is_active = true` whose
///   record still resolves.
/// - `replace_active_lane` is observed by other callers as a single step.
#[async_trait]
pub trait DoltStore: Send + Sync {
    /// Insert or replace a record. Re-upserting a pointer keeps its `created_at`.
    async fn upsert_record(&self, record: NewRecord) -> StorageResult<Record>;

    /// Fetch a record by pointer, `None` when absent.
    async fn get_record(&self, pointer: &Pointer) -> StorageResult<Option<Record>>;

    /// All records of one lane, ordered by `(event_ts_ms, pointer)`.
    async fn list_records_by_session(
        &self,
        session_id: &str,
        level: Level,
        newest_first: bool,
    ) -> StorageResult<Vec<Record>>;

    /// Insert or replace one active-lane entry.
    async fn upsert_active_lane(&self, entry: ActiveLaneEntry) -> StorageResult<()>;

    /// Flip every active entry of the lane to inactive.
    async fn deactivate_level_pointers(&self, session_id: &str, level: Level)
        -> StorageResult<()>;

    /// Active entries of the lane joined with their records, in no particular order.
    async fn list_active_records(
        &self,
        session_id: &str,
        level: Level,
    ) -> StorageResult<Vec<ActiveRecord>>;

    /// Distinct session ids that own at least one record, sorted.
    async fn list_sessions(&self) -> StorageResult<Vec<String>>;

    /// Deactivate the whole lane, then activate `activations`.
    ///
    /// Backends override this to make the pair atomic. The default runs the
    /// steps one after another and relies on the caller holding the lane lock.
    async fn replace_active_lane(
        &self,
        session_id: &str,
        session_key: Option<&str>,
        level: Level,
        activations: &[LaneActivation],
    ) -> StorageResult<()> {
        self.deactivate_level_pointers(session_id, level).await?;
        for activation in activations {
            self.upsert_active_lane(ActiveLaneEntry {
                session_id: session_id.to_string(),
                session_key: session_key.map(str::to_string),
                level,
                pointer: activation.pointer.clone(),
                is_active: true,
                last_event_ts_ms: activation.last_event_ts_ms,
            })
            .await?;
        }
        Ok(())
    }

    /// Active record counts and token totals for every level of a session.
    async fn active_lane_snapshot(&self, session_id: &str) -> StorageResult<ActiveLaneSnapshot> {
        let mut snapshot = ActiveLaneSnapshot::default();
        for level in Level::ALL {
            let active = self.list_active_records(session_id, level).await?;
            snapshot.set(
                level,
                LaneStats {
                    record_count: active.len() as u64,
                    token_total: active
                        .iter()
                        .map(|a| a.record.token_count)
                        .fold(0, u64::saturating_add),
                },
            );
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("Bindle".parse::<Level>().unwrap(), Level::Bindle);
        assert_eq!(" turn ".parse::<Level>().unwrap(), Level::Turn);
        assert!("chapter".parse::<Level>().is_err());
    }

    #[test]
    fn level_all_is_priority_order() {
        assert_eq!(Level::ALL, [Level::Bindle, Level::Leaf, Level::Turn]);
        assert!(Level::Bindle < Level::Turn);
    }

    #[test]
    fn derived_pointer_is_stable_and_content_sensitive() {
        let a = Pointer::derive("s1", Level::Leaf, 10, "hello");
        let b = Pointer::derive("s1", Level::Leaf, 10, "hello");
        let c = Pointer::derive("s1", Level::Leaf, 11, "hello");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("leaf-"));
        assert_eq!(a.as_str().len(), "leaf-".len() + 16);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn resolve_trims_identity_fields() {
        let record = NewRecord::new("  s1 ", Level::Turn, 1, "hi")
            .with_session_key("   ")
            .resolve(Utc::now())
            .unwrap();
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.session_key, None);
        assert_eq!(record.token_count, 1);
    }

    #[test]
    fn resolve_rejects_blank_pointer() {
        let err = NewRecord::new("s1", Level::Turn, 1, "hi")
            .with_pointer(" ")
            .resolve(Utc::now())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
    }

    #[test]
    fn level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Level::Leaf).unwrap(), "\"leaf\"");
    }

    #[test]
    fn snapshot_total_saturates_across_levels() {
        let mut snapshot = ActiveLaneSnapshot::default();
        snapshot.set(
            Level::Leaf,
            LaneStats {
                record_count: 1,
                token_total: u64::MAX - 5,
            },
        );
        snapshot.set(
            Level::Turn,
            LaneStats {
                record_count: 1,
                token_total: 10,
            },
        );
        assert_eq!(snapshot.total_tokens(), u64::MAX);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let mut snapshot = ActiveLaneSnapshot::default();
        snapshot.set(
            Level::Bindle,
            LaneStats {
                record_count: 2,
                token_total: 42,
            },
        );
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["bindle"]["recordCount"], 2);
        assert_eq!(json["bindle"]["tokenTotal"], 42);
        assert!(json["bindle"].get("token_total").is_none());
    }
}
