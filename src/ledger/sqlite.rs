//! SQLite-backed ledger: records live in an `audit_log` table.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::core::SluiceError;

use super::{AuditLedger, AuditRecord, ledger_error};

const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_timestamp TEXT NOT NULL,
    table_name TEXT NOT NULL,
    load_type TEXT NOT NULL,
    rows_extracted INTEGER NOT NULL,
    outcome TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_table ON audit_log (table_name);
";

pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open or create the ledger database at `path`.
    pub fn open(path: &Path) -> Result<Self, SluiceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ledger_error(&format!("opening {}", path.display()), e))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, SluiceError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ledger_error("opening in-memory ledger", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, SluiceError> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(|e| ledger_error("creating audit_log", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn insert(conn: &Connection, record: &AuditRecord) -> Result<(), SluiceError> {
    let rows = i64::try_from(record.rows_extracted)
        .map_err(|e| ledger_error("rows_extracted out of range", e))?;
    conn.execute(
        "INSERT INTO audit_log (run_timestamp, table_name, load_type, rows_extracted, outcome) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            record
                .run_timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            record.table_name,
            record.load_type.as_str(),
            rows,
            record.outcome.as_str(),
        ],
    )
    .map_err(|e| ledger_error("inserting audit record", e))?;
    Ok(())
}

fn select_all(conn: &Connection) -> Result<Vec<AuditRecord>, SluiceError> {
    let mut stmt = conn
        .prepare(
            "SELECT run_timestamp, table_name, load_type, rows_extracted, outcome \
             FROM audit_log ORDER BY id",
        )
        .map_err(|e| ledger_error("reading audit_log", e))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .map_err(|e| ledger_error("reading audit_log", e))?;

    let mut records = Vec::new();
    for row in rows {
        let (ts, table_name, load_type, rows_extracted, outcome) =
            row.map_err(|e| ledger_error("reading audit_log", e))?;
        records.push(AuditRecord {
            run_timestamp: DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| ledger_error(&format!("bad timestamp '{ts}'"), e))?
                .with_timezone(&Utc),
            table_name,
            load_type: load_type.parse()?,
            rows_extracted: u64::try_from(rows_extracted)
                .map_err(|e| ledger_error("negative rows_extracted", e))?,
            outcome: outcome.parse()?,
        });
    }
    Ok(records)
}

#[async_trait]
impl AuditLedger for SqliteLedger {
    async fn append(&self, record: &AuditRecord) -> Result<(), SluiceError> {
        let conn = Arc::clone(&self.conn);
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| SluiceError::LedgerError("ledger lock poisoned".into()))?;
            insert(&conn, &record)
        })
        .await?
    }

    async fn read_all(&self) -> Result<Vec<AuditRecord>, SluiceError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| SluiceError::LedgerError("ledger lock poisoned".into()))?;
            select_all(&conn)
        })
        .await?
    }
}
