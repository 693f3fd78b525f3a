//! Error taxonomy for the Dolt context engine.

use dolt_state::StorageError;

use crate::frontmatter::FrontmatterError;

/// Errors produced by hydration, eviction, assembly and rollup.
#[derive(Debug, thiserror::Error)]
pub enum DoltError {
    /// Required identity input was missing or blank.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("frontmatter error: {0}")]
    Frontmatter(#[from] FrontmatterError),
}

/// Result type for Dolt engine operations.
pub type Result<T> = std::result::Result<T, DoltError>;

/// Trim a session id and reject it when nothing is left.
pub(crate) fn require_session_id(session_id: &str) -> Result<String> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err(DoltError::InvalidInput(
            "sessionId must be a non-empty string".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional session key; blank keys are treated as absent.
pub(crate) fn normalize_session_key(session_key: Option<&str>) -> Option<String> {
    session_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}
