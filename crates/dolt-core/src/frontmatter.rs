//! Bindle summary frontmatter.
//!
//! A bindle payload is a delimited JSON block followed by the summary body:
//!
//! ```text
//! ---
//! {"summaryType":"bindle","datesCovered":{...},"children":[...],"finalizedAtReset":false}
//! ---
//! body text
//! ```
//!
//! `children` is the provenance trail back to the leaves and turns the
//! summary subsumes.

use dolt_state::{Pointer, Record};
use serde::{Deserialize, Serialize};

/// The only accepted `summaryType`.
pub const SUMMARY_TYPE_BINDLE: &str = "bindle";

const DELIMITER: &str = "---";

/// Errors from composing or parsing frontmatter.
#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    #[error("payload does not start with a frontmatter block")]
    MissingOpening,

    #[error("frontmatter block is not terminated")]
    MissingClosing,

    #[error("malformed frontmatter json: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected summary type: {found}")]
    UnexpectedSummaryType { found: String },

    #[error("dates covered are inverted: start {start} > end {end}")]
    InvertedRange { start: i64, end: i64 },

    #[error("a rollup needs at least one child record")]
    NoChildren,
}

/// Time range a bindle summarizes, epoch milliseconds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatesCovered {
    pub start_epoch_ms: i64,
    pub end_epoch_ms: i64,
}

/// Metadata block prefixed to every bindle payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindleFrontmatter {
    pub summary_type: String,
    pub dates_covered: DatesCovered,
    pub children: Vec<Pointer>,
    pub finalized_at_reset: bool,
}

impl BindleFrontmatter {
    pub fn new(
        start_epoch_ms: i64,
        end_epoch_ms: i64,
        children: Vec<Pointer>,
        finalized_at_reset: bool,
    ) -> Result<Self, FrontmatterError> {
        let fm = Self {
            summary_type: SUMMARY_TYPE_BINDLE.to_string(),
            dates_covered: DatesCovered {
                start_epoch_ms,
                end_epoch_ms,
            },
            children,
            finalized_at_reset,
        };
        fm.validate()?;
        Ok(fm)
    }

    pub fn validate(&self) -> Result<(), FrontmatterError> {
        if self.summary_type != SUMMARY_TYPE_BINDLE {
            return Err(FrontmatterError::UnexpectedSummaryType {
                found: self.summary_type.clone(),
            });
        }
        let DatesCovered {
            start_epoch_ms,
            end_epoch_ms,
        } = self.dates_covered;
        if start_epoch_ms > end_epoch_ms {
            return Err(FrontmatterError::InvertedRange {
                start: start_epoch_ms,
                end: end_epoch_ms,
            });
        }
        Ok(())
    }
}

/// Serialize the frontmatter block, delimiters included, without a trailing newline.
///
/// Frontmatter that [`parse_bindle_payload`] would reject is refused here, so
/// every block this writes parses back.
pub fn serialize_frontmatter(fm: &BindleFrontmatter) -> Result<String, FrontmatterError> {
    fm.validate()?;
    let json = serde_json::to_string(fm)?;
    Ok(format!("{DELIMITER}\n{json}\n{DELIMITER}"))
}

/// Frontmatter block, a single newline, then the body.
pub fn compose_bindle_payload(
    fm: &BindleFrontmatter,
    body: &str,
) -> Result<String, FrontmatterError> {
    Ok(format!("{}\n{}", serialize_frontmatter(fm)?, body))
}

/// Split a bindle payload into its frontmatter and body.
pub fn parse_bindle_payload(
    payload: &str,
) -> Result<(BindleFrontmatter, &str), FrontmatterError> {
    let rest = payload
        .strip_prefix(DELIMITER)
        .and_then(|r| r.strip_prefix('\n'))
        .ok_or(FrontmatterError::MissingOpening)?;

    let closing = rest
        .find(&format!("\n{DELIMITER}"))
        .ok_or(FrontmatterError::MissingClosing)?;
    let json = &rest[..closing];
    let after = &rest[closing + 1 + DELIMITER.len()..];

    let body = if after.is_empty() {
        after
    } else {
        after
            .strip_prefix('\n')
            .ok_or(FrontmatterError::MissingClosing)?
    };

    let fm: BindleFrontmatter = serde_json::from_str(json)?;
    fm.validate()?;
    Ok((fm, body))
}

/// Build frontmatter for a rollup of `children`.
///
/// Children are listed by `(event_ts_ms, pointer)`; the covered range spans
/// the earliest to the latest child event.
pub fn rollup_frontmatter(
    children: &[Record],
    finalized_at_reset: bool,
) -> Result<BindleFrontmatter, FrontmatterError> {
    let mut ordered: Vec<&Record> = children.iter().collect();
    ordered.sort_by(|a, b| {
        a.event_ts_ms
            .cmp(&b.event_ts_ms)
            .then_with(|| a.pointer.cmp(&b.pointer))
    });

    let (Some(first), Some(last)) = (ordered.first(), ordered.last()) else {
        return Err(FrontmatterError::NoChildren);
    };

    BindleFrontmatter::new(
        first.event_ts_ms,
        last.event_ts_ms,
        ordered.iter().map(|r| r.pointer.clone()).collect(),
        finalized_at_reset,
    )
}
