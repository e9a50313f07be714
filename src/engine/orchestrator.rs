use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::batch::partition;
use crate::conf::{EngineConfig, LoadType, TableLoadSpec};
use crate::core::SluiceError;
use crate::delivery::{Deliverer, Destination};
use crate::ledger::{AuditLedger, AuditRecord, Outcome, WatermarkStore};
use crate::plan::plan;
use crate::source::{SourceQuery, extract};

use super::{RunReport, RunState, TableLocks, TableReport, TableRun};

/// Current instant at the precision kept by the ledger and query literals.
pub fn capture_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Runs table loads: one watermark read, extraction, delivery and audit
/// append per table, with bounded parallelism across tables.
#[derive(Clone)]
pub struct Engine {
    source: Arc<dyn SourceQuery>,
    deliverer: Arc<Deliverer>,
    ledger: Arc<dyn AuditLedger>,
    watermarks: WatermarkStore,
    config: EngineConfig,
    locks: Arc<TableLocks>,
}

impl Engine {
    pub fn new(
        source: Arc<dyn SourceQuery>,
        destination: Arc<dyn Destination>,
        ledger: Arc<dyn AuditLedger>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            deliverer: Arc::new(Deliverer::new(destination, &config)),
            watermarks: WatermarkStore::new(Arc::clone(&ledger), config.epoch),
            ledger,
            config,
            locks: Arc::new(TableLocks::new()),
        }
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    pub async fn run(&self, tables: &[TableLoadSpec]) -> RunReport {
        self.run_at(tables, capture_now()).await
    }

    /// Runs every table with `now` as the run timestamp. Reports come back in
    /// the order of `tables`; a failing table never stops the others.
    pub async fn run_at(&self, tables: &[TableLoadSpec], now: DateTime<Utc>) -> RunReport {
        log::info!(
            "Starting run {} for {} tables (parallelism {})",
            now,
            tables.len(),
            self.config.parallelism
        );

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut join_set = JoinSet::new();
        for (index, spec) in tables.iter().cloned().enumerate() {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, engine.run_table(&spec, now).await)
            });
        }

        let mut slots: Vec<Option<TableReport>> = (0..tables.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => log::error!("Table run task did not complete: {e}"),
            }
        }

        let reports = slots
            .into_iter()
            .zip(tables)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| TableReport {
                    record: aborted_record(spec, now),
                    state: RunState::Failed,
                    batches_delivered: 0,
                    error: Some("table run aborted".to_string()),
                })
            })
            .collect();

        RunReport {
            run_timestamp: now,
            tables: reports,
        }
    }

    /// Runs one table to a terminal state while holding its lock.
    pub async fn run_table(&self, spec: &TableLoadSpec, now: DateTime<Utc>) -> TableReport {
        let _guard = self.locks.acquire(&spec.name).await;
        let started = Instant::now();
        let mut run = TableRun::new(&spec.name);
        let mut rows = 0u64;

        let (outcome, batches_delivered, mut error) =
            match self.load(spec, now, &mut run, &mut rows).await {
                Ok(batches) if rows == 0 => (Outcome::Empty, batches, None),
                Ok(batches) => (Outcome::Success, batches, None),
                Err(e) => {
                    run.advance(RunState::Failed);
                    log::error!("Table '{}': {}", spec.name, e);
                    (Outcome::Failed, e.batches_written(), Some(e))
                }
            };

        let record = AuditRecord {
            run_timestamp: now,
            table_name: spec.name.clone(),
            load_type: spec.load_type,
            rows_extracted: rows,
            outcome,
        };

        match self.ledger.append(&record).await {
            Ok(()) => {
                if outcome != Outcome::Failed {
                    run.advance(RunState::Recorded);
                }
                log::info!(
                    "Table '{}': {} load {} ({} rows, {} batches) in {:?}",
                    spec.name,
                    spec.load_type,
                    outcome,
                    rows,
                    batches_delivered,
                    started.elapsed()
                );
            }
            Err(e) => {
                let e = SluiceError::LedgerAppendFailed {
                    table: spec.name.clone(),
                    cause: e.to_string(),
                };
                log::error!("Table '{}': {}", spec.name, e);
                if run.state() != RunState::Failed {
                    run.advance(RunState::Failed);
                }
                error.get_or_insert(e);
            }
        }

        TableReport {
            record,
            state: run.state(),
            batches_delivered,
            error: error.map(|e| e.to_string()),
        }
    }

    /// Extract, partition and deliver. `rows` is set as soon as extraction
    /// succeeds so a delivery failure still records the extracted count.
    async fn load(
        &self,
        spec: &TableLoadSpec,
        now: DateTime<Utc>,
        run: &mut TableRun,
        rows: &mut u64,
    ) -> Result<usize, SluiceError> {
        run.advance(RunState::Extracting);
        let watermark = match spec.load_type {
            LoadType::Full => self.watermarks.epoch(),
            LoadType::Incremental => self
                .watermarks
                .get_watermark(&spec.name)
                .await
                .map_err(|e| SluiceError::LedgerReadFailed {
                    table: spec.name.clone(),
                    cause: e.to_string(),
                })?,
        };

        let query = plan(spec, watermark, now)?;
        let mut extracted = extract(self.source.as_ref(), &query, self.config.source_timeout).await?;
        *rows = extracted.row_count() as u64;
        if let Some(column) = &spec.inserted_at_column {
            extracted = extracted.with_inserted_at(column, now)?;
        }
        let batches = partition(&extracted, spec.batch_size.get());

        run.advance(RunState::Delivering);
        let delivered = self
            .deliverer
            .deliver(&spec.name, spec.load_type, spec.format, &batches)
            .await?;
        Ok(delivered.batches_written)
    }
}

fn aborted_record(spec: &TableLoadSpec, now: DateTime<Utc>) -> AuditRecord {
    AuditRecord {
        run_timestamp: now,
        table_name: spec.name.clone(),
        load_type: spec.load_type,
        rows_extracted: 0,
        outcome: Outcome::Failed,
    }
}
