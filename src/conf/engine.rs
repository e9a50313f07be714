use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of tables loaded at the same time.
    #[serde(default = "EngineConfig::default_parallelism")]
    pub parallelism: usize,
    /// Attempts per batch upload, including the first one.
    #[serde(default = "EngineConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde", default = "EngineConfig::default_retry_backoff")]
    pub retry_backoff: Duration,
    #[serde(
        with = "humantime_serde",
        default = "EngineConfig::default_retry_backoff_max"
    )]
    pub retry_backoff_max: Duration,
    #[serde(with = "humantime_serde", default = "EngineConfig::default_source_timeout")]
    pub source_timeout: Duration,
    #[serde(
        with = "humantime_serde",
        default = "EngineConfig::default_destination_timeout"
    )]
    pub destination_timeout: Duration,
    /// Watermark of a table that has never been loaded.
    #[serde(default = "EngineConfig::default_epoch")]
    pub epoch: DateTime<Utc>,
}

impl EngineConfig {
    fn default_parallelism() -> usize {
        4
    }

    fn default_max_attempts() -> u32 {
        3
    }

    fn default_retry_backoff() -> Duration {
        Duration::from_millis(200)
    }

    fn default_retry_backoff_max() -> Duration {
        Duration::from_secs(10)
    }

    fn default_source_timeout() -> Duration {
        Duration::from_secs(600)
    }

    fn default_destination_timeout() -> Duration {
        Duration::from_secs(60)
    }

    pub fn default_epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Delay before retry number `attempt` (1-based): exponential from
    /// `retry_backoff`, capped at `retry_backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.retry_backoff_max)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: Self::default_parallelism(),
            max_attempts: Self::default_max_attempts(),
            retry_backoff: Self::default_retry_backoff(),
            retry_backoff_max: Self::default_retry_backoff_max(),
            source_timeout: Self::default_source_timeout(),
            destination_timeout: Self::default_destination_timeout(),
            epoch: Self::default_epoch(),
        }
    }
}
