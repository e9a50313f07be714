use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::SluiceError;

use super::{AuditLedger, AuditRecord};

/// Latest run timestamp of `table` among the records that advance its
/// watermark. Pure: depends only on the set of records, not their order.
pub fn latest_watermark(records: &[AuditRecord], table: &str) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter(|r| r.table_name == table && r.outcome.advances_watermark())
        .map(|r| r.run_timestamp)
        .max()
}

/// Derives per-table watermarks from the audit ledger.
#[derive(Clone)]
pub struct WatermarkStore {
    ledger: Arc<dyn AuditLedger>,
    epoch: DateTime<Utc>,
}

impl WatermarkStore {
    pub fn new(ledger: Arc<dyn AuditLedger>, epoch: DateTime<Utc>) -> Self {
        Self { ledger, epoch }
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Watermark of `table`, or the epoch when it has never been loaded.
    pub async fn get_watermark(&self, table: &str) -> Result<DateTime<Utc>, SluiceError> {
        let records = self.ledger.read_all().await?;
        Ok(latest_watermark(&records, table).unwrap_or(self.epoch))
    }

    /// Watermarks of several tables from a single ledger read.
    pub async fn get_watermarks(
        &self,
        tables: &[String],
    ) -> Result<Vec<(String, DateTime<Utc>)>, SluiceError> {
        let records = self.ledger.read_all().await?;
        Ok(tables
            .iter()
            .map(|t| {
                (
                    t.clone(),
                    latest_watermark(&records, t).unwrap_or(self.epoch),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::LoadType;
    use crate::ledger::{MemoryLedger, Outcome};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap()
    }

    fn record(table: &str, day: u32, outcome: Outcome) -> AuditRecord {
        AuditRecord {
            run_timestamp: at(day),
            table_name: table.to_string(),
            load_type: LoadType::Incremental,
            rows_extracted: 1,
            outcome,
        }
    }

    fn history() -> Vec<AuditRecord> {
        vec![
            record("events", 3, Outcome::Success),
            record("events", 7, Outcome::Failed),
            record("events", 5, Outcome::Empty),
            record("events", 5, Outcome::Empty),
            record("dropped_table", 9, Outcome::Success),
            record("orders", 2, Outcome::Success),
        ]
    }

    #[test]
    fn test_max_of_advancing_records() {
        assert_eq!(latest_watermark(&history(), "events"), Some(at(5)));
        assert_eq!(latest_watermark(&history(), "orders"), Some(at(2)));
        assert_eq!(latest_watermark(&history(), "unknown"), None);
    }

    #[test]
    fn test_order_does_not_matter() {
        let mut reversed = history();
        reversed.reverse();
        for table in ["events", "orders", "dropped_table"] {
            assert_eq!(
                latest_watermark(&history(), table),
                latest_watermark(&reversed, table)
            );
        }
    }

    #[test]
    fn test_failed_only_history_has_no_watermark() {
        let records = vec![record("events", 4, Outcome::Failed)];
        assert_eq!(latest_watermark(&records, "events"), None);
    }

    #[tokio::test]
    async fn test_store_defaults_to_epoch() {
        let epoch = at(1);
        let store = WatermarkStore::new(Arc::new(MemoryLedger::with_records(history())), epoch);

        assert_eq!(store.get_watermark("events").await.unwrap(), at(5));
        assert_eq!(store.get_watermark("customers").await.unwrap(), epoch);

        let all = store
            .get_watermarks(&["orders".to_string(), "customers".to_string()])
            .await
            .unwrap();
        assert_eq!(
            all,
            vec![("orders".to_string(), at(2)), ("customers".to_string(), epoch)]
        );
    }
}
