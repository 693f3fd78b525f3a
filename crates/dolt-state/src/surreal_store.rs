//! SurrealDB-backed DoltStore implementation
//!
//! Uses `schema::RecordRow` and `schema::ActiveLaneRow` for persistence,
//! converting to/from `storage_traits` types at the boundary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, warn};

use crate::connection::{CloudConfig, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{ActiveLaneRow, RecordRow, ACTIVE_LANE_TABLE, RECORDS_TABLE};
use crate::storage_traits::{
    ActiveLaneEntry, ActiveRecord, DoltStore, LaneActivation, Level, NewRecord, Pointer, Record,
    StorageResult,
};

/// Default on-disk location used when no database is configured
pub const DEFAULT_LOCAL_PATH: &str = ".dolt/db";

/// SurrealDB-backed implementation of [`DoltStore`].
pub struct SurrealDoltStore {
    db: Surreal<Any>,
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    session_id: String,
}

impl SurrealDoltStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `dolt/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any URL supported by the `any` engine
    /// (`mem://`, `surrealkv://path`, `ws://host`, `wss://host`).
    pub async fn connect(url: &str) -> crate::Result<Self> {
        if let Some(path) = url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealDoltStore connected ({})", url);
        Ok(Self { db })
    }

    /// Connect to a remote instance with credentials.
    pub async fn connect_cloud(config: &CloudConfig) -> crate::Result<Self> {
        use surrealdb::opt::auth::{Database, Root};

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("DB auth failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealDoltStore connected (cloud)");
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// Tries [`CloudConfig::from_env`], then `SURREALDB_URL`, then falls back
    /// to local persistence under [`DEFAULT_LOCAL_PATH`].
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            return Self::connect_cloud(&config).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }

        let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
        info!(
            "No cloud config or SURREALDB_URL found, using local persistence: {}",
            url
        );
        Self::connect(&url).await
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_lane_rows(
        &self,
        session_id: &str,
        level: Level,
    ) -> StorageResult<Vec<ActiveLaneRow>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM dolt_active_lane \
                 WHERE session_id = $sid AND level = $level AND is_active = true",
            )
            .bind(("sid", session_id.to_string()))
            .bind(("level", level.as_str().to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        res.take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn fetch_records(
        &self,
        pointers: Vec<String>,
    ) -> StorageResult<HashMap<Pointer, Record>> {
        if pointers.is_empty() {
            return Ok(HashMap::new());
        }
        let mut res = self
            .db
            .query("SELECT * FROM dolt_records WHERE pointer IN $pointers")
            .bind(("pointers", pointers))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<RecordRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| row.into_record().map(|r| (r.pointer.clone(), r)))
            .collect()
    }
}

#[async_trait]
impl DoltStore for SurrealDoltStore {
    async fn upsert_record(&self, record: NewRecord) -> StorageResult<Record> {
        let mut record = record.resolve(Utc::now())?;
        if let Some(existing) = self.get_record(&record.pointer).await? {
            record.created_at = existing.created_at;
        }

        debug!(pointer = %record.pointer, level = %record.level, "upserting record");

        let row = RecordRow::from(&record);
        let _stored: Option<RecordRow> = self
            .db
            .upsert((RECORDS_TABLE, record.pointer.as_str().to_string()))
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(record)
    }

    async fn get_record(&self, pointer: &Pointer) -> StorageResult<Option<Record>> {
        let row: Option<RecordRow> = self
            .db
            .select((RECORDS_TABLE, pointer.as_str().to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(RecordRow::into_record).transpose()
    }

    async fn list_records_by_session(
        &self,
        session_id: &str,
        level: Level,
        newest_first: bool,
    ) -> StorageResult<Vec<Record>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM dolt_records WHERE session_id = $sid AND level = $level \
                 ORDER BY event_ts_ms ASC, pointer ASC",
            )
            .bind(("sid", session_id.to_string()))
            .bind(("level", level.as_str().to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<RecordRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut records = rows
            .into_iter()
            .map(RecordRow::into_record)
            .collect::<StorageResult<Vec<_>>>()?;
        // SurrealQL string ordering is collation-aware; re-sort on byte order.
        records.sort_by(|a, b| {
            a.event_ts_ms
                .cmp(&b.event_ts_ms)
                .then_with(|| a.pointer.cmp(&b.pointer))
        });
        if newest_first {
            records.reverse();
        }
        Ok(records)
    }

    async fn upsert_active_lane(&self, entry: ActiveLaneEntry) -> StorageResult<()> {
        let row = ActiveLaneRow::from(&entry);
        let key = row.lane_key.clone();
        let _stored: Option<ActiveLaneRow> = self
            .db
            .upsert((ACTIVE_LANE_TABLE, key))
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn deactivate_level_pointers(
        &self,
        session_id: &str,
        level: Level,
    ) -> StorageResult<()> {
        self.db
            .query(
                "UPDATE dolt_active_lane SET is_active = false \
                 WHERE session_id = $sid AND level = $level AND is_active = true",
            )
            .bind(("sid", session_id.to_string()))
            .bind(("level", level.as_str().to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .check()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_active_records(
        &self,
        session_id: &str,
        level: Level,
    ) -> StorageResult<Vec<ActiveRecord>> {
        let lanes = self.fetch_lane_rows(session_id, level).await?;
        let pointers = lanes.iter().map(|l| l.pointer.clone()).collect();
        let mut records = self.fetch_records(pointers).await?;

        let mut out = Vec::with_capacity(lanes.len());
        for row in lanes {
            let lane = row.into_entry()?;
            match records.remove(&lane.pointer) {
                Some(record) => out.push(ActiveRecord { record, lane }),
                None => warn!(pointer = %lane.pointer, "active lane entry without record"),
            }
        }
        Ok(out)
    }

    async fn list_sessions(&self) -> StorageResult<Vec<String>> {
        let mut res = self
            .db
            .query("SELECT session_id FROM dolt_records GROUP BY session_id")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<SessionRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut sessions: Vec<String> = rows.into_iter().map(|r| r.session_id).collect();
        sessions.sort();
        sessions.dedup();
        Ok(sessions)
    }

    /// Deactivate and reactivate inside a single SurrealQL transaction.
    async fn replace_active_lane(
        &self,
        session_id: &str,
        session_key: Option<&str>,
        level: Level,
        activations: &[LaneActivation],
    ) -> StorageResult<()> {
        let rows: Vec<ActiveLaneRow> = activations
            .iter()
            .map(|a| {
                ActiveLaneRow::from(&ActiveLaneEntry {
                    session_id: session_id.to_string(),
                    session_key: session_key.map(str::to_string),
                    level,
                    pointer: a.pointer.clone(),
                    is_active: true,
                    last_event_ts_ms: a.last_event_ts_ms,
                })
            })
            .collect();

        debug!(
            session_id = %session_id,
            level = %level,
            activations = rows.len(),
            "replacing active lane"
        );

        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                UPDATE dolt_active_lane SET is_active = false
                    WHERE session_id = $sid AND level = $level AND is_active = true;
                FOR $row IN $rows {
                    UPSERT type::thing('dolt_active_lane', $row.lane_key) CONTENT $row;
                };
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("sid", session_id.to_string()))
            .bind(("level", level.as_str().to_string()))
            .bind(("rows", rows))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .check()
            .map_err(|e| StorageError::Backend(format!("active lane transaction failed: {e}")))?;

        Ok(())
    }
}
