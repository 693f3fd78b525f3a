//! Bindle rollup: fold existing records into a new bindle record.

use dolt_state::{DoltStore, Level, NewRecord, Pointer, Record, StorageError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{normalize_session_key, require_session_id, DoltError, Result};
use crate::frontmatter::{compose_bindle_payload, rollup_frontmatter};

/// Request to roll `children` up into a bindle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindleRollup {
    pub session_id: String,
    #[serde(default)]
    pub session_key: Option<String>,
    pub children: Vec<Pointer>,
    pub body: String,
    #[serde(default)]
    pub finalized_at_reset: bool,
    /// Explicit pointer; derived from content when absent
    #[serde(default)]
    pub pointer: Option<Pointer>,
    /// Token count of the bindle; estimated from the payload when absent
    #[serde(default)]
    pub token_count: Option<u64>,
}

/// Compose frontmatter from the children and persist the bindle.
///
/// The bindle's `event_ts_ms` is the end of the covered range. Children must
/// exist, belong to the same session, and be leaves or turns.
pub async fn rollup_bindle(store: &dyn DoltStore, rollup: &BindleRollup) -> Result<Record> {
    let session_id = require_session_id(&rollup.session_id)?;

    let mut children = Vec::with_capacity(rollup.children.len());
    for pointer in &rollup.children {
        let child = store
            .get_record(pointer)
            .await?
            .ok_or_else(|| StorageError::RecordNotFound {
                pointer: pointer.to_string(),
            })?;
        if child.session_id != session_id {
            return Err(DoltError::InvalidInput(format!(
                "child {} belongs to session {}",
                pointer, child.session_id
            )));
        }
        if child.level == Level::Bindle {
            return Err(DoltError::InvalidInput(format!(
                "child {} is already a bindle",
                pointer
            )));
        }
        children.push(child);
    }

    let fm = rollup_frontmatter(&children, rollup.finalized_at_reset)?;
    let payload = compose_bindle_payload(&fm, &rollup.body)?;

    let mut record = NewRecord::new(
        session_id,
        Level::Bindle,
        fm.dates_covered.end_epoch_ms,
        payload,
    );
    record.pointer = rollup.pointer.clone();
    record.session_key = normalize_session_key(rollup.session_key.as_deref());
    record.token_count = rollup.token_count;

    let stored = store.upsert_record(record).await?;
    info!(
        event = "rollup.bindle",
        pointer = %stored.pointer,
        children = fm.children.len(),
        finalized_at_reset = fm.finalized_at_reset,
    );
    Ok(stored)
}
