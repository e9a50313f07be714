//! Append-only audit ledger of table runs.
//!
//! The ledger is the only durable state the engine owns. Watermarks are not
//! stored anywhere else: they are derived from the records at read time
//! (see [`WatermarkStore`]).

mod csv;
mod memory;
mod sqlite;
mod watermark;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conf::{LedgerConfig, LoadType};
use crate::core::SluiceError;

pub use csv::CsvLedger;
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use watermark::{WatermarkStore, latest_watermark};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Empty,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Empty => "empty",
            Outcome::Failed => "failed",
        }
    }

    /// Whether a record with this outcome moves the table's watermark to its
    /// run timestamp. An empty window has been fully accounted for, so it
    /// must not be scanned again.
    pub fn advances_watermark(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Empty)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "empty" => Ok(Outcome::Empty),
            "failed" => Ok(Outcome::Failed),
            other => Err(SluiceError::LedgerError(format!("unknown outcome '{other}'"))),
        }
    }
}

/// Outcome of one table run. Never modified once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    /// Instant the run started; the next watermark candidate.
    pub run_timestamp: DateTime<Utc>,
    pub table_name: String,
    pub load_type: LoadType,
    pub rows_extracted: u64,
    pub outcome: Outcome,
}

/// Durable append-only record store.
///
/// `append` must be atomic per record and safe to call from concurrent
/// table runs; a returned `Ok` means the record is durable.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), SluiceError>;

    async fn read_all(&self) -> Result<Vec<AuditRecord>, SluiceError>;
}

pub fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn AuditLedger>, SluiceError> {
    match config {
        LedgerConfig::Csv(c) => Ok(Arc::new(CsvLedger::new(&c.path))),
        LedgerConfig::Sqlite(c) => Ok(Arc::new(SqliteLedger::open(&c.path)?)),
    }
}

pub(crate) fn ledger_error(context: &str, err: impl fmt::Display) -> SluiceError {
    SluiceError::LedgerError(format!("{context}: {err}"))
}
