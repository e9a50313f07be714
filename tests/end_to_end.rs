mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, params};
use tempfile::TempDir;

use common::at;
use sluice::conf::Config;
use sluice::delivery::open_destination;
use sluice::engine::Engine;
use sluice::ledger::{Outcome, open_ledger};
use sluice::source::open_source;

fn config(dir: &Path) -> Config {
    let toml = format!(
        r#"
        [engine]
        parallelism = 2
        retry_backoff = "1ms"

        [source.sqlite]
        path = "{db}"

        [destination.local]
        path = "{out}"
        prefix = "warehouse"

        [ledger.csv]
        path = "{ledger}"

        [[tables]]
        name = "customers"
        load_type = "full"
        query = "SELECT id, name FROM customers ORDER BY id"
        batch_size = 2

        [[tables]]
        name = "events"
        load_type = "incremental"
        query = "SELECT id, kind, updated_at FROM events WHERE updated_at >= {{window_start}} AND updated_at < {{window_end}} ORDER BY id"
        batch_size = 100
        format = "parquet"
        inserted_at_column = "loaded_at"
        "#,
        db = dir.join("source.db").display(),
        out = dir.join("out").display(),
        ledger = dir.join("audit_log.csv").display(),
    );
    Config::from_str(&toml).unwrap()
}

fn seed(db: &Path) -> Connection {
    let conn = Connection::open(db).unwrap();
    conn.execute_batch(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE events (id INTEGER PRIMARY KEY, kind TEXT, updated_at TEXT NOT NULL);
         INSERT INTO customers (name) VALUES ('ada'), ('grace'), ('edsger');",
    )
    .unwrap();
    for (kind, ts) in [
        ("click", "2024-05-01 00:15:00.000"),
        ("view", "2024-05-01 00:45:00.000"),
    ] {
        conn.execute(
            "INSERT INTO events (kind, updated_at) VALUES (?1, ?2)",
            params![kind, ts],
        )
        .unwrap();
    }
    conn
}

fn files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn engine(config: &Config) -> Engine {
    Engine::new(
        open_source(&config.source).unwrap(),
        Arc::new(open_destination(&config.destination).unwrap()),
        open_ledger(&config.ledger).unwrap(),
        config.engine.clone(),
    )
}

#[tokio::test]
async fn test_sqlite_to_local_directory_with_csv_ledger() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let conn = seed(&dir.path().join("source.db"));
    let out = dir.path().join("out").join("warehouse");
    let engine = engine(&config);

    let report = engine.run_at(&config.tables, at(1, 0)).await;
    assert!(!report.has_failures(), "{report}");

    let customers = files(&out.join("customers"));
    assert_eq!(customers.len(), 2);
    assert!(customers.iter().all(|f| f.starts_with("customers_000") && f.ends_with(".csv")));
    let first = fs::read_to_string(out.join("customers").join(&customers[0])).unwrap();
    assert_eq!(first.lines().next(), Some("id,name"));

    let events = files(&out.join("events"));
    assert_eq!(events.len(), 1);
    assert!(events[0].ends_with(".parquet"));
    assert_eq!(report.get("events").unwrap().rows(), 2);

    // A second run only picks up rows changed since the first run started.
    conn.execute(
        "INSERT INTO events (kind, updated_at) VALUES ('purchase', '2024-05-01 01:30:00.000')",
        [],
    )
    .unwrap();
    conn.execute("INSERT INTO customers (name) VALUES ('barbara')", [])
        .unwrap();

    let report = engine.run_at(&config.tables, at(2, 0)).await;
    assert!(!report.has_failures(), "{report}");
    assert_eq!(report.get("events").unwrap().rows(), 1);
    assert_eq!(report.get("customers").unwrap().rows(), 4);
    assert_eq!(files(&out.join("events")).len(), 2);
    assert_eq!(files(&out.join("customers")).len(), 2);

    let ledger = open_ledger(&config.ledger).unwrap();
    let records = ledger.read_all().await.unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.outcome == Outcome::Success));

    let text = fs::read_to_string(dir.path().join("audit_log.csv")).unwrap();
    assert_eq!(
        text.lines().next(),
        Some("run_timestamp,table_name,load_type,rows_extracted,outcome")
    );
    assert!(text.contains("2024-05-01T02:00:00.000Z,events,incremental,1,success"));
}

#[tokio::test]
async fn test_missing_source_table_is_recorded_as_failure() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let conn = Connection::open(dir.path().join("source.db")).unwrap();
    conn.execute_batch("CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);")
        .unwrap();

    let report = engine(&config).run_at(&config.tables, at(1, 0)).await;

    assert!(report.has_failures());
    assert_eq!(report.get("customers").unwrap().outcome(), Outcome::Empty);
    let events = report.get("events").unwrap();
    assert_eq!(events.outcome(), Outcome::Failed);
    assert!(events.error.as_deref().unwrap().contains("no such table"));
}
