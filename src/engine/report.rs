use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::conf::LoadType;
use crate::ledger::{AuditRecord, Outcome};

use super::RunState;

/// Result of one table within a run.
#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    /// The record built for this table run. When `state` is `Failed` because
    /// the append itself failed, this record is not in the ledger.
    pub record: AuditRecord,
    pub state: RunState,
    pub batches_delivered: usize,
    pub error: Option<String>,
}

impl TableReport {
    pub fn table(&self) -> &str {
        &self.record.table_name
    }

    pub fn load_type(&self) -> LoadType {
        self.record.load_type
    }

    pub fn rows(&self) -> u64 {
        self.record.rows_extracted
    }

    /// Outcome as seen by the operator: a run whose record could not be
    /// persisted did not happen as far as the next run is concerned.
    pub fn outcome(&self) -> Outcome {
        if self.state == RunState::Failed {
            Outcome::Failed
        } else {
            self.record.outcome
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_timestamp: DateTime<Utc>,
    pub tables: Vec<TableReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.tables.iter().any(|t| t.outcome() == Outcome::Failed)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.tables.iter().filter(|t| t.outcome() == outcome).count()
    }

    pub fn get(&self, table: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table() == table)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {}: {} succeeded, {} empty, {} failed",
            self.run_timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.count(Outcome::Success),
            self.count(Outcome::Empty),
            self.count(Outcome::Failed),
        )?;
        let width = self
            .tables
            .iter()
            .map(|t| t.table().len())
            .max()
            .unwrap_or(0)
            .max("table".len());
        writeln!(
            f,
            "  {:<width$}  {:<11}  {:<7}  {:>10}  {:>7}",
            "table", "load", "outcome", "rows", "batches"
        )?;
        for t in &self.tables {
            write!(
                f,
                "  {:<width$}  {:<11}  {:<7}  {:>10}  {:>7}",
                t.table(),
                t.load_type(),
                t.outcome(),
                t.rows(),
                t.batches_delivered
            )?;
            if let Some(error) = &t.error {
                write!(f, "  {error}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
