//! Extraction planning: turns a table's load spec and its watermark into the
//! query executed against the source.

use chrono::{DateTime, Utc};

use crate::conf::{LoadType, TableLoadSpec};
use crate::core::SluiceError;

pub const WINDOW_START: &str = "{window_start}";
pub const WINDOW_END: &str = "{window_end}";

/// Rendering of window bounds inside the query, as quoted SQL literals.
const LITERAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Half-open extraction window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutableQuery {
    pub table: String,
    pub load_type: LoadType,
    pub sql: String,
    /// Present for incremental loads only.
    pub window: Option<Window>,
}

pub fn format_literal(ts: DateTime<Utc>) -> String {
    format!("'{}'", ts.format(LITERAL_FORMAT))
}

/// Builds the query for one table run.
///
/// `now` must be the instant captured once at run start: it is both the
/// exclusive upper bound of the window and the audit timestamp that becomes
/// the next run's lower bound.
pub fn plan(
    spec: &TableLoadSpec,
    watermark: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ExecutableQuery, SluiceError> {
    match spec.load_type {
        LoadType::Full => Ok(ExecutableQuery {
            table: spec.name.clone(),
            load_type: LoadType::Full,
            sql: spec.query.clone(),
            window: None,
        }),
        LoadType::Incremental => {
            spec.validate()?;
            let window = Window {
                start: watermark,
                end: now,
            };
            if window.is_empty() {
                log::warn!(
                    "Table '{}': watermark {} is not before run start {}, window is empty",
                    spec.name,
                    watermark,
                    now
                );
            }
            let sql = spec
                .query
                .replace(WINDOW_START, &format_literal(window.start))
                .replace(WINDOW_END, &format_literal(window.end));
            Ok(ExecutableQuery {
                table: spec.name.clone(),
                load_type: LoadType::Incremental,
                sql,
                window: Some(window),
            })
        }
    }
}
