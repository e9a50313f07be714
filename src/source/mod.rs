mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use arrow::array::{ArrayRef, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conf::SourceConfig;
use crate::core::SluiceError;
use crate::plan::ExecutableQuery;

pub use sqlite::SqliteSource;

/// Query execution against the relational source.
#[async_trait]
pub trait SourceQuery: Send + Sync {
    /// Executes a fully bound query and returns all of its rows.
    async fn execute(&self, query: &ExecutableQuery) -> Result<RecordBatch, SluiceError>;
}

/// Opens the source named in the configuration. The connection lives as long
/// as the returned value, which the caller scopes to one run.
pub fn open_source(config: &SourceConfig) -> Result<Arc<dyn SourceQuery>, SluiceError> {
    match config {
        SourceConfig::Sqlite(c) => Ok(Arc::new(SqliteSource::open(c)?)),
    }
}

/// Rows extracted for one table run.
#[derive(Debug)]
pub struct ExtractionResult {
    table: String,
    batch: RecordBatch,
}

impl ExtractionResult {
    pub fn new(table: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            table: table.into(),
            batch,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Appends a non-null UTC timestamp column set to `ts` on every row.
    pub fn with_inserted_at(self, column: &str, ts: DateTime<Utc>) -> Result<Self, SluiceError> {
        let rows = self.batch.num_rows();
        let schema = self.batch.schema();
        if schema.column_with_name(column).is_some() {
            return Err(SluiceError::invalid_table(
                &self.table,
                format!("result already has a column named '{column}'"),
            ));
        }

        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        fields.push(Field::new(
            column,
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ));

        let stamp = TimestampMillisecondArray::from_value(ts.timestamp_millis(), rows)
            .with_timezone("UTC");
        let mut columns: Vec<ArrayRef> = self.batch.columns().to_vec();
        columns.push(Arc::new(stamp));

        let batch = RecordBatch::try_new_with_options(
            Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone())),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(rows)),
        )?;
        Ok(Self {
            table: self.table,
            batch,
        })
    }
}

/// Runs `query` with a deadline. Any failure, including the timeout, is
/// reported as [`SluiceError::ExtractionFailed`] for the query's table.
pub async fn extract(
    source: &dyn SourceQuery,
    query: &ExecutableQuery,
    timeout: Duration,
) -> Result<ExtractionResult, SluiceError> {
    log::debug!("Table '{}': executing {}", query.table, query.sql);
    match tokio::time::timeout(timeout, source.execute(query)).await {
        Ok(Ok(batch)) => Ok(ExtractionResult::new(query.table.clone(), batch)),
        Ok(Err(e)) => Err(SluiceError::extraction(&query.table, e)),
        Err(_) => Err(SluiceError::extraction(
            &query.table,
            SluiceError::Timeout(format!("source query exceeded {timeout:?}")),
        )),
    }
}
