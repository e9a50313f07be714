//! SQLite-backed source.
//!
//! SQLite values are dynamically typed, so each result column gets the
//! narrowest Arrow type that holds every value it returned: all integers
//! become `Int64`, integers mixed with reals become `Float64`, and anything
//! involving text or blobs becomes `Utf8` (blobs rendered as lowercase hex).

use std::sync::{Arc, Mutex};

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use crate::conf::SqliteSourceConfig;
use crate::core::SluiceError;
use crate::plan::ExecutableQuery;

use super::SourceQuery;

pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSource {
    /// Opens the database read-only.
    pub fn open(config: &SqliteSourceConfig) -> Result<Self, SluiceError> {
        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            SluiceError::SourceError(format!(
                "opening sqlite source {}: {}",
                config.path.display(),
                e
            ))
        })?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

#[async_trait]
impl SourceQuery for SqliteSource {
    async fn execute(&self, query: &ExecutableQuery) -> Result<RecordBatch, SluiceError> {
        let conn = Arc::clone(&self.conn);
        let sql = query.sql.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| SluiceError::SourceError("sqlite connection lock poisoned".into()))?;
            query_to_batch(&conn, &sql)
        })
        .await?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Null,
    Integer,
    Real,
    Text,
}

impl ColumnKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnKind::Null,
            Value::Integer(_) => ColumnKind::Integer,
            Value::Real(_) => ColumnKind::Real,
            Value::Text(_) | Value::Blob(_) => ColumnKind::Text,
        }
    }

    fn widen(self, other: Self) -> Self {
        use ColumnKind::*;
        match (self, other) {
            (Null, k) | (k, Null) => k,
            (Integer, Integer) => Integer,
            (Integer, Real) | (Real, Integer) | (Real, Real) => Real,
            _ => Text,
        }
    }
}

fn render_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Blob(b) => Some(b.iter().map(|byte| format!("{byte:02x}")).collect()),
    }
}

fn to_array(values: &[Value]) -> (DataType, ArrayRef) {
    let kind = values
        .iter()
        .map(ColumnKind::of)
        .fold(ColumnKind::Null, ColumnKind::widen);

    match kind {
        ColumnKind::Integer => {
            let array: Int64Array = values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect();
            (DataType::Int64, Arc::new(array))
        }
        ColumnKind::Real => {
            let array: Float64Array = values
                .iter()
                .map(|v| match v {
                    Value::Integer(i) => Some(*i as f64),
                    Value::Real(f) => Some(*f),
                    _ => None,
                })
                .collect();
            (DataType::Float64, Arc::new(array))
        }
        ColumnKind::Null | ColumnKind::Text => {
            let array: StringArray = values.iter().map(render_text).collect();
            (DataType::Utf8, Arc::new(array))
        }
    }
}

fn query_to_batch(conn: &Connection, sql: &str) -> Result<RecordBatch, SluiceError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
    let mut row_count = 0usize;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(row.get::<_, Value>(i)?);
        }
        row_count += 1;
    }

    let mut fields = Vec::with_capacity(names.len());
    let mut arrays = Vec::with_capacity(names.len());
    for (name, values) in names.iter().zip(&columns) {
        let (dtype, array) = to_array(values);
        fields.push(Field::new(name, dtype, true));
        arrays.push(array);
    }

    let batch = RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &RecordBatchOptions::new().with_row_count(Some(row_count)),
    )?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::LoadType;
    use arrow::array::Array;

    fn query(sql: &str) -> ExecutableQuery {
        ExecutableQuery {
            table: "t".to_string(),
            load_type: LoadType::Full,
            sql: sql.to_string(),
            window: None,
        }
    }

    fn source() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER, price REAL, name TEXT, raw BLOB);
             INSERT INTO t VALUES (1, 9.5, 'a', x'00ff');
             INSERT INTO t VALUES (2, 10, NULL, NULL);
             INSERT INTO t VALUES (3, NULL, 'c', x'10');",
        )
        .unwrap();
        SqliteSource::from_connection(conn)
    }

    #[tokio::test]
    async fn test_column_types_are_inferred() {
        let batch = source()
            .execute(&query("SELECT id, price, name, raw FROM t ORDER BY id"))
            .await
            .unwrap();

        assert_eq!(batch.num_rows(), 3);
        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Float64);
        assert_eq!(schema.field(2).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);

        let prices = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(prices.value(1), 10.0);
        assert!(prices.is_null(2));

        let raw = batch
            .column(3)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(raw.value(0), "00ff");
    }

    #[tokio::test]
    async fn test_empty_result_keeps_columns() {
        let batch = source()
            .execute(&query("SELECT id, name FROM t WHERE id > 100"))
            .await
            .unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.schema().field(1).name(), "name");
    }

    #[tokio::test]
    async fn test_bad_query_is_source_error() {
        let err = source()
            .execute(&query("SELECT * FROM missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::SourceError(msg) if msg.contains("missing")));
    }

    #[test]
    fn test_widening() {
        assert_eq!(
            ColumnKind::Integer.widen(ColumnKind::Real),
            ColumnKind::Real
        );
        assert_eq!(ColumnKind::Null.widen(ColumnKind::Integer), ColumnKind::Integer);
        assert_eq!(ColumnKind::Real.widen(ColumnKind::Text), ColumnKind::Text);
    }
}
