//! SurrealDB schema migrations and initialization
//!
//! Defines the record and active-lane tables with their indexes. Every
//! statement uses `IF NOT EXISTS`, so running `init_schema` again is a no-op.

use crate::error::StateError;
use crate::schema::{ACTIVE_LANE_TABLE, RECORDS_TABLE};
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Dolt tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Dolt SurrealDB schema");

    init_records_table(db).await?;
    init_active_lane_table(db).await?;

    info!("Dolt schema initialization complete");
    Ok(())
}

/// Initialize `dolt_records`
///
/// Schema:
/// ```text
/// TABLE dolt_records {
///   pointer:      STRING (record id, unique)
///   session_id:   STRING (indexed with level, event_ts_ms)
///   session_key:  STRING?
///   level:        STRING (bindle | leaf | turn)
///   event_ts_ms:  INT
///   token_count:  INT
///   payload:      STRING
///   created_at:   DATETIME
/// }
/// ```
///
/// Records are never deleted: `FOR delete NONE`.
async fn init_records_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing {} table", RECORDS_TABLE);

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS dolt_records
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_record_pointer ON TABLE dolt_records COLUMNS pointer UNIQUE;

        -- Lane listing by content time
        DEFINE INDEX IF NOT EXISTS idx_record_lane ON TABLE dolt_records COLUMNS session_id, level, event_ts_ms;
    "#;

    db.query(sql)
        .await?
        .check()
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ {} table initialized", RECORDS_TABLE);
    Ok(())
}

/// Initialize `dolt_active_lane`
///
/// Schema:
/// ```text
/// TABLE dolt_active_lane {
///   lane_key:          STRING (record id, "session_id/level/pointer")
///   session_id:        STRING
///   session_key:       STRING?
///   level:             STRING
///   pointer:           STRING
///   is_active:         BOOL
///   last_event_ts_ms:  INT
/// }
/// ```
///
/// Constraints:
/// - `(session_id, level, pointer)` is unique
async fn init_active_lane_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing {} table", ACTIVE_LANE_TABLE);

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS dolt_active_lane
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_lane_member ON TABLE dolt_active_lane COLUMNS session_id, level, pointer UNIQUE;

        DEFINE INDEX IF NOT EXISTS idx_lane_active ON TABLE dolt_active_lane COLUMNS session_id, level, is_active;
    "#;

    db.query(sql)
        .await?
        .check()
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ {} table initialized", ACTIVE_LANE_TABLE);
    Ok(())
}
