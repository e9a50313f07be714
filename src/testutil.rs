//! Test and benchmark utilities.
//!
//! This module is only available when the `testutil` feature is enabled.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{ArrayRef, BooleanArray, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::compute::filter_record_batch;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::memory::InMemory;
use tempfile::TempDir;

use crate::conf::{BatchFormat, EngineConfig, LoadType, TableLoadSpec};
use crate::core::SluiceError;
use crate::delivery::{Destination, ObjectStoreDestination};
use crate::ledger::CsvLedger;
use crate::plan::ExecutableQuery;
use crate::source::SourceQuery;

/// Column holding each row's modification time in [`timed_batch`] results.
pub const UPDATED_AT: &str = "updated_at";

/// `n` rows of `(id, name)` where `id` is the row index and `name` its
/// stringified value.
pub fn rows_batch(n: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]));
    let ids = Int64Array::from_iter_values(0..n as i64);
    let names: StringArray = (0..n).map(|i| Some(format!("row-{i}"))).collect();
    RecordBatch::try_new(schema, vec![Arc::new(ids), Arc::new(names)]).unwrap()
}

/// One row per timestamp: `(id, updated_at)`.
pub fn timed_batch(times: &[DateTime<Utc>]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new(
            UPDATED_AT,
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
    ]));
    let ids = Int64Array::from_iter_values(0..times.len() as i64);
    let stamps = TimestampMillisecondArray::from(
        times.iter().map(|t| t.timestamp_millis()).collect::<Vec<_>>(),
    )
    .with_timezone("UTC");
    let columns: Vec<ArrayRef> = vec![Arc::new(ids), Arc::new(stamps)];
    RecordBatch::try_new(schema, columns).unwrap()
}

pub fn table_spec(name: &str, load_type: LoadType, batch_size: usize) -> TableLoadSpec {
    let query = match load_type {
        LoadType::Full => format!("SELECT * FROM {name}"),
        LoadType::Incremental => format!(
            "SELECT * FROM {name} WHERE {UPDATED_AT} >= {{window_start}} AND {UPDATED_AT} < {{window_end}}"
        ),
    };
    TableLoadSpec {
        name: name.to_string(),
        load_type,
        query,
        batch_size: NonZeroUsize::new(batch_size).expect("batch_size must be positive"),
        format: BatchFormat::Csv,
        inserted_at_column: None,
    }
}

/// Engine settings with millisecond backoff so retry tests stay fast.
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        retry_backoff: Duration::from_millis(1),
        retry_backoff_max: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

/// In-memory source. Full loads return a table's rows unchanged; incremental
/// loads return the rows whose [`UPDATED_AT`] lies inside the query window.
/// Every executed query is kept for inspection.
#[derive(Default)]
pub struct MemorySource {
    tables: Mutex<HashMap<String, RecordBatch>>,
    failures: Mutex<HashMap<String, String>>,
    delay: Mutex<Option<Duration>>,
    queries: Mutex<Vec<ExecutableQuery>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every query sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Mutex::new(Some(delay)),
            ..Self::default()
        }
    }

    /// Later queries answer without sleeping.
    pub fn clear_delay(&self) {
        *self.delay.lock().unwrap() = None;
    }

    pub fn set_table(&self, table: &str, rows: RecordBatch) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }

    /// Queries for `table` fail with `message` until [`Self::heal`] is called.
    pub fn fail_table(&self, table: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(table.to_string(), message.to_string());
    }

    pub fn heal(&self, table: &str) {
        self.failures.lock().unwrap().remove(table);
    }

    pub fn queries(&self) -> Vec<ExecutableQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn queries_for(&self, table: &str) -> Vec<ExecutableQuery> {
        self.queries()
            .into_iter()
            .filter(|q| q.table == table)
            .collect()
    }
}

#[async_trait]
impl SourceQuery for MemorySource {
    async fn execute(&self, query: &ExecutableQuery) -> Result<RecordBatch, SluiceError> {
        self.queries.lock().unwrap().push(query.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failures.lock().unwrap().get(&query.table) {
            return Err(SluiceError::SourceError(message.clone()));
        }

        let rows = self
            .tables
            .lock()
            .unwrap()
            .get(&query.table)
            .cloned()
            .ok_or_else(|| SluiceError::SourceError(format!("no such table: {}", query.table)))?;

        let Some(window) = query.window else {
            return Ok(rows);
        };
        let stamps = rows
            .column_by_name(UPDATED_AT)
            .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
            .ok_or_else(|| SluiceError::SourceError(format!("no {UPDATED_AT} column")))?;
        let mask: BooleanArray = stamps
            .iter()
            .map(|ts| {
                ts.and_then(DateTime::from_timestamp_millis)
                    .map(|ts| window.contains(ts))
            })
            .collect();
        Ok(filter_record_batch(&rows, &mask)?)
    }
}

pub fn memory_destination() -> Arc<ObjectStoreDestination> {
    Arc::new(ObjectStoreDestination::new(Arc::new(InMemory::new()), ""))
}

/// Destination whose puts fail while a failure budget remains, or for good
/// once a success budget is spent.
pub struct FlakyDestination {
    inner: Arc<ObjectStoreDestination>,
    failing_puts: AtomicUsize,
    passing_puts: AtomicUsize,
}

impl FlakyDestination {
    pub fn new(inner: Arc<ObjectStoreDestination>) -> Self {
        Self {
            inner,
            failing_puts: AtomicUsize::new(0),
            passing_puts: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Lets `n` more puts through, then fails every put.
    pub fn fail_puts_after(&self, n: usize) {
        self.passing_puts.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Destination for FlakyDestination {
    async fn put(&self, key: &str, payload: Bytes) -> Result<(), SluiceError> {
        let budget = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if budget.is_ok() {
            return Err(SluiceError::StorageError(format!("injected failure for {key}")));
        }
        let passing = self
            .passing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if passing.is_err() {
            return Err(SluiceError::StorageError(format!("access denied for {key}")));
        }
        self.inner.put(key, payload).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, SluiceError> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), SluiceError> {
        self.inner.delete(key).await
    }
}

/// A CSV ledger in a fresh temporary directory. Keep the directory alive
/// for as long as the ledger is used.
pub fn temp_csv_ledger() -> (TempDir, Arc<CsvLedger>) {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(CsvLedger::new(dir.path().join("audit_log.csv")));
    (dir, ledger)
}
