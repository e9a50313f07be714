use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::SluiceError;

use super::{AuditLedger, AuditRecord};

/// Process-local ledger; nothing survives a restart.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<AuditRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl AuditLedger for MemoryLedger {
    async fn append(&self, record: &AuditRecord) -> Result<(), SluiceError> {
        self.records
            .lock()
            .map_err(|_| SluiceError::LedgerError("ledger lock poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AuditRecord>, SluiceError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| SluiceError::LedgerError("ledger lock poisoned".into()))?
            .clone())
    }
}
