//! Flat-file ledger: one CSV line per record, header written on creation.
//!
//! ```text
//! run_timestamp,table_name,load_type,rows_extracted,outcome
//! 2024-04-01T06:00:00.000Z,orders,full,2500,success
//! ```
//!
//! A crash mid-append can leave a last line without its terminating newline.
//! Readers skip such a line; the next append truncates it before writing.

use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use arrow::array::{Array, ArrayRef, StringArray, UInt64Array};
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::SluiceError;

use super::{AuditLedger, AuditRecord, ledger_error};

static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("run_timestamp", DataType::Utf8, false),
        Field::new("table_name", DataType::Utf8, false),
        Field::new("load_type", DataType::Utf8, false),
        Field::new("rows_extracted", DataType::UInt64, false),
        Field::new("outcome", DataType::Utf8, false),
    ]))
});

pub struct CsvLedger {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn to_batch(record: &AuditRecord) -> Result<RecordBatch, SluiceError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![
            record
                .run_timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ])),
        Arc::new(StringArray::from(vec![record.table_name.clone()])),
        Arc::new(StringArray::from(vec![record.load_type.as_str()])),
        Arc::new(UInt64Array::from(vec![record.rows_extracted])),
        Arc::new(StringArray::from(vec![record.outcome.as_str()])),
    ];
    Ok(RecordBatch::try_new(SCHEMA.clone(), columns)?)
}

fn string_column<'a>(batch: &'a RecordBatch, index: usize) -> Result<&'a StringArray, SluiceError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| SluiceError::LedgerError(format!("column {index} is not text")))
}

fn from_batch(batch: &RecordBatch, out: &mut Vec<AuditRecord>) -> Result<(), SluiceError> {
    let timestamps = string_column(batch, 0)?;
    let tables = string_column(batch, 1)?;
    let load_types = string_column(batch, 2)?;
    let rows = batch
        .column(3)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| SluiceError::LedgerError("rows_extracted is not an integer".into()))?;
    let outcomes = string_column(batch, 4)?;

    for i in 0..batch.num_rows() {
        let run_timestamp = DateTime::parse_from_rfc3339(timestamps.value(i))
            .map_err(|e| ledger_error(&format!("bad timestamp '{}'", timestamps.value(i)), e))?
            .with_timezone(&Utc);
        out.push(AuditRecord {
            run_timestamp,
            table_name: tables.value(i).to_string(),
            load_type: load_types.value(i).parse()?,
            rows_extracted: rows.value(i),
            outcome: outcomes.value(i).parse()?,
        });
    }
    Ok(())
}

/// Prefix of `bytes` made of newline-terminated lines only.
fn complete_lines(bytes: &[u8]) -> &[u8] {
    match bytes.iter().rposition(|b| *b == b'\n') {
        Some(pos) => &bytes[..=pos],
        None => &[],
    }
}

/// Cuts an unterminated last line off `file`, returning the remaining length.
fn truncate_torn_tail(file: &mut File, path: &Path) -> std::io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut bytes = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    let keep = complete_lines(&bytes).len() as u64;
    log::warn!(
        "Dropping {} bytes of an incomplete record at the end of {}",
        len - keep,
        path.display()
    );
    file.set_len(keep)?;
    Ok(keep)
}

fn append_line(path: &Path, record: &AuditRecord) -> Result<(), SluiceError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| ledger_error(&format!("opening {}", path.display()), e))?;
    let is_new = truncate_torn_tail(&mut file, path)
        .map_err(|e| ledger_error(&format!("repairing {}", path.display()), e))?
        == 0;

    let mut buf = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(is_new).build(&mut buf);
        writer.write(&to_batch(record)?)?;
    }

    // Single write so a record is never interleaved with another writer's.
    file.write_all(&buf)
        .and_then(|_| file.sync_data())
        .map_err(|e| ledger_error(&format!("appending to {}", path.display()), e))?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<AuditRecord>, SluiceError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ledger_error(&format!("opening {}", path.display()), e)),
    };
    let complete = complete_lines(&bytes);
    if complete.len() < bytes.len() {
        log::warn!(
            "Ignoring incomplete last record of {} ({} bytes)",
            path.display(),
            bytes.len() - complete.len()
        );
    }
    if complete.is_empty() {
        return Ok(Vec::new());
    }

    let reader = ReaderBuilder::new(SCHEMA.clone())
        .with_header(true)
        .build(Cursor::new(complete))
        .map_err(|e| ledger_error(&format!("reading {}", path.display()), e))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| ledger_error(&format!("parsing {}", path.display()), e))?;
        from_batch(&batch, &mut records)?;
    }
    Ok(records)
}

#[async_trait]
impl AuditLedger for CsvLedger {
    async fn append(&self, record: &AuditRecord) -> Result<(), SluiceError> {
        let path = self.path.clone();
        let lock = Arc::clone(&self.write_lock);
        let record = record.clone();
        // Runs to completion even if the calling task is dropped.
        tokio::task::spawn_blocking(move || {
            let _guard = lock
                .lock()
                .map_err(|_| SluiceError::LedgerError("ledger lock poisoned".into()))?;
            append_line(&path, &record)
        })
        .await?
    }

    async fn read_all(&self) -> Result<Vec<AuditRecord>, SluiceError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_file(&path)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::LoadType;
    use crate::ledger::Outcome;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(table: &str, minute: u32, outcome: Outcome) -> AuditRecord {
        AuditRecord {
            run_timestamp: Utc.with_ymd_and_hms(2024, 4, 1, 6, minute, 0).unwrap(),
            table_name: table.to_string(),
            load_type: LoadType::Incremental,
            rows_extracted: 10,
            outcome,
        }
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = CsvLedger::new(dir.path().join("audit.csv"));
        assert!(ledger.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let ledger = CsvLedger::new(dir.path().join("audit.csv"));

        ledger.append(&record("events", 0, Outcome::Success)).await.unwrap();
        ledger.append(&record("events", 5, Outcome::Failed)).await.unwrap();

        let text = std::fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "run_timestamp,table_name,load_type,rows_extracted,outcome",
                "2024-04-01T06:00:00.000Z,events,incremental,10,success",
                "2024-04-01T06:05:00.000Z,events,incremental,10,failed",
            ]
        );
    }

    #[tokio::test]
    async fn test_read_preserves_append_order() {
        let dir = TempDir::new().unwrap();
        let ledger = CsvLedger::new(dir.path().join("audit.csv"));
        let records = vec![
            record("events", 0, Outcome::Success),
            record("orders, eu", 1, Outcome::Empty),
            record("events", 2, Outcome::Failed),
        ];
        for r in &records {
            ledger.append(r).await.unwrap();
        }
        assert_eq!(ledger.read_all().await.unwrap(), records);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_not_torn() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(CsvLedger::new(dir.path().join("audit.csv")));

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .append(&record(&format!("t{i}"), i, Outcome::Success))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let records = ledger.read_all().await.unwrap();
        assert_eq!(records.len(), 20);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_ledger_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.csv");
        std::fs::write(
            &path,
            "run_timestamp,table_name,load_type,rows_extracted,outcome\nyesterday,events,incremental,1,success\n",
        )
        .unwrap();
        let err = CsvLedger::new(&path).read_all().await.unwrap_err();
        assert!(matches!(err, SluiceError::LedgerError(msg) if msg.contains("yesterday")));
    }

    const HEADER: &str = "run_timestamp,table_name,load_type,rows_extracted,outcome\n";

    #[tokio::test]
    async fn test_torn_last_line_is_skipped_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.csv");
        std::fs::write(
            &path,
            format!("{HEADER}2024-04-01T06:00:00.000Z,events,incremental,10,success\n2024-04-01T06:05:00.0"),
        )
        .unwrap();

        let records = CsvLedger::new(&path).read_all().await.unwrap();
        assert_eq!(records, vec![record("events", 0, Outcome::Success)]);
    }

    #[tokio::test]
    async fn test_torn_header_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.csv");
        std::fs::write(&path, "run_timestamp,table_na").unwrap();

        assert!(CsvLedger::new(&path).read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_after_torn_line_starts_clean() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.csv");
        std::fs::write(
            &path,
            format!("{HEADER}2024-04-01T06:00:00.000Z,events,incremental,10,success\n2024-04-01T06:05:00.000Z,ev"),
        )
        .unwrap();
        let ledger = CsvLedger::new(&path);

        ledger.append(&record("events", 10, Outcome::Empty)).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with("2024-04-01T06:10:00.000Z,events,incremental,10,empty\n"));
        assert_eq!(
            ledger.read_all().await.unwrap(),
            vec![
                record("events", 0, Outcome::Success),
                record("events", 10, Outcome::Empty),
            ]
        );
    }

    #[tokio::test]
    async fn test_append_after_torn_header_rewrites_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.csv");
        std::fs::write(&path, "run_timestamp,tab").unwrap();
        let ledger = CsvLedger::new(&path);

        ledger.append(&record("events", 0, Outcome::Success)).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(HEADER));
        assert_eq!(ledger.read_all().await.unwrap().len(), 1);
    }
}
