//! Delivery of batches to the destination object store.
//!
//! Full loads remove every object under the table's namespace before writing
//! (a crash in between leaves the namespace empty, never stale). Incremental
//! loads only ever add objects; each batch key embeds its delivery time, so
//! delivering the same rows twice produces two objects.

mod store;

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

use crate::batch::Batch;
use crate::conf::{BatchFormat, EngineConfig, LoadType};
use crate::core::SluiceError;

pub use store::{ObjectStoreDestination, create_local_store, create_s3_store, open_destination};

const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Put/list/delete access to the destination. Keys are `<table>/<object>`.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn put(&self, key: &str, payload: Bytes) -> Result<(), SluiceError>;

    /// Keys under `prefix`, which is matched as whole path segments.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, SluiceError>;

    /// Removing a key that does not exist is not an error.
    async fn delete(&self, key: &str) -> Result<(), SluiceError>;
}

/// Key of one batch object: `<table>/<table>_<seq>_<yyyymmddHHMMSSfff>.<ext>`.
pub fn batch_key(table: &str, sequence: u32, at: DateTime<Utc>, format: BatchFormat) -> String {
    format!(
        "{table}/{table}_{sequence:04}_{}.{}",
        at.format(KEY_TIMESTAMP_FORMAT),
        format.extension()
    )
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryOutcome {
    pub objects_removed: usize,
    pub batches_written: usize,
    pub rows_written: usize,
    pub keys: Vec<String>,
}

pub struct Deliverer {
    destination: Arc<dyn Destination>,
    engine: EngineConfig,
    last_stamp: Mutex<DateTime<Utc>>,
}

impl Deliverer {
    pub fn new(destination: Arc<dyn Destination>, engine: &EngineConfig) -> Self {
        Self {
            destination,
            engine: engine.clone(),
            last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Delivery time for the next key. Strictly increasing at key precision,
    /// so back-to-back runs never reuse a key.
    fn stamp(&self) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now().trunc_subsecs(3);
        *last = if now > *last {
            now
        } else {
            *last + TimeDelta::milliseconds(1)
        };
        *last
    }

    /// Delivers all batches of one table run. Any error is reported as
    /// [`SluiceError::DeliveryFailed`] carrying the number of batches written
    /// before the failure; those objects are left in place.
    pub async fn deliver(
        &self,
        table: &str,
        load_type: LoadType,
        format: BatchFormat,
        batches: &[Batch],
    ) -> Result<DeliveryOutcome, SluiceError> {
        let mut outcome = DeliveryOutcome::default();

        if load_type == LoadType::Full {
            outcome.objects_removed = self
                .clear(table)
                .await
                .map_err(|e| SluiceError::delivery(table, e, 0))?;
        }

        for batch in batches {
            let payload = batch
                .encode(format)
                .map_err(|e| SluiceError::delivery(table, e, outcome.batches_written))?;
            let key = batch_key(table, batch.sequence, self.stamp(), format);

            self.with_retry(&key, || self.destination.put(&key, payload.clone()))
                .await
                .map_err(|e| SluiceError::delivery(table, e, outcome.batches_written))?;

            log::debug!(
                "Table '{}': wrote batch {} ({} rows) to {}",
                table,
                batch.sequence,
                batch.row_count(),
                key
            );
            outcome.batches_written += 1;
            outcome.rows_written += batch.row_count();
            outcome.keys.push(key);
        }

        Ok(outcome)
    }

    /// Removes every object in the table's namespace.
    async fn clear(&self, table: &str) -> Result<usize, SluiceError> {
        let keys = self
            .with_retry(table, || self.destination.list(table))
            .await?;
        for key in &keys {
            self.with_retry(key, || self.destination.delete(key)).await?;
        }
        if !keys.is_empty() {
            log::info!(
                "Table '{}': removed {} objects from previous full load",
                table,
                keys.len()
            );
        }
        Ok(keys.len())
    }

    async fn with_retry<T, F, Fut>(&self, target: &str, mut op: F) -> Result<T, SluiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SluiceError>>,
    {
        let max_attempts = self.engine.max_attempts.max(1);
        let timeout = self.engine.destination_timeout;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SluiceError::Timeout(format!(
                    "destination call for '{target}' exceeded {timeout:?}"
                ))),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    let delay = self.engine.backoff(attempt);
                    log::warn!(
                        "Destination call for '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        target,
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
