use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Run-level locks keyed by table name. Holding the guard for a table
/// excludes every other run of that table on the same engine.
#[derive(Default)]
pub struct TableLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, table: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(table.to_string()).or_default())
    }

    /// Waits until no other run holds `table`.
    pub async fn acquire(&self, table: &str) -> OwnedMutexGuard<()> {
        self.lock_for(table).lock_owned().await
    }

    pub fn try_acquire(&self, table: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(table).try_lock_owned().ok()
    }
}
