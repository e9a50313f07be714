#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use object_store::path::Path as ObjectPath;

use sluice::conf::EngineConfig;
use sluice::delivery::{Destination, ObjectStoreDestination};
use sluice::engine::Engine;
use sluice::ledger::{AuditLedger, AuditRecord, MemoryLedger};

pub use sluice::testutil::*;

/// 2024-05-01 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}

/// An engine wired to in-memory collaborators that stay inspectable.
pub struct Harness {
    pub source: Arc<MemorySource>,
    pub destination: Arc<ObjectStoreDestination>,
    pub ledger: Arc<MemoryLedger>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_source(MemorySource::new(), fast_engine_config())
    }

    pub fn with_source(source: MemorySource, config: EngineConfig) -> Self {
        let source = Arc::new(source);
        let destination = memory_destination();
        let ledger = Arc::new(MemoryLedger::new());
        let engine = Engine::new(source.clone(), destination.clone(), ledger.clone(), config);
        Self {
            source,
            destination,
            ledger,
            engine,
        }
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.ledger.read_all().await.unwrap()
    }

    pub async fn keys(&self, table: &str) -> Vec<String> {
        self.destination.list(table).await.unwrap()
    }

    pub async fn object(&self, key: &str) -> String {
        let bytes = self
            .destination
            .store()
            .get(&ObjectPath::parse(key).unwrap())
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Data rows of a delivered CSV object, header excluded.
    pub async fn csv_rows(&self, key: &str) -> usize {
        self.object(key).await.lines().count() - 1
    }
}
