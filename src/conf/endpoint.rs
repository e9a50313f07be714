use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct S3DestinationConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "S3DestinationConfig::default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

impl S3DestinationConfig {
    pub fn default_region() -> String {
        String::from("us-east-1")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LocalDestinationConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub enum DestinationConfig {
    #[serde(rename = "s3")]
    S3(S3DestinationConfig),
    #[serde(rename = "local")]
    Local(LocalDestinationConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SqliteSourceConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub enum SourceConfig {
    #[serde(rename = "sqlite")]
    Sqlite(SqliteSourceConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileLedgerConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub enum LedgerConfig {
    /// Flat CSV file, one record per line.
    #[serde(rename = "csv")]
    Csv(FileLedgerConfig),
    /// `audit_log` table in a SQLite database.
    #[serde(rename = "sqlite")]
    Sqlite(FileLedgerConfig),
}
