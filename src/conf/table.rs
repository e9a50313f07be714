use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::SluiceError;
use crate::plan::{WINDOW_END, WINDOW_START};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    Full,
    Incremental,
}

impl LoadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadType::Full => "full",
            LoadType::Incremental => "incremental",
        }
    }
}

impl fmt::Display for LoadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LoadType {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(LoadType::Full),
            "incremental" => Ok(LoadType::Incremental),
            other => Err(SluiceError::LedgerError(format!(
                "unknown load type '{other}'"
            ))),
        }
    }
}

/// Serialization of a delivered batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchFormat {
    #[default]
    Csv,
    Parquet,
}

impl BatchFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BatchFormat::Csv => "csv",
            BatchFormat::Parquet => "parquet",
        }
    }
}

/// Load configuration of a single source table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TableLoadSpec {
    /// Table identifier, also the namespace of its objects at the destination.
    pub name: String,
    pub load_type: LoadType,
    /// Extraction query. Incremental templates must reference both
    /// `{window_start}` and `{window_end}`.
    pub query: String,
    pub batch_size: NonZeroUsize,
    #[serde(default)]
    pub format: BatchFormat,
    /// When set, a UTC timestamp column with this name is appended to every
    /// extracted row, holding the instant the run started.
    #[serde(default)]
    pub inserted_at_column: Option<String>,
}

impl TableLoadSpec {
    pub fn validate(&self) -> Result<(), SluiceError> {
        if self.name.trim().is_empty() {
            return Err(SluiceError::invalid_table(&self.name, "name is empty"));
        }
        if self.name.contains('/') {
            return Err(SluiceError::invalid_table(
                &self.name,
                "name must not contain '/'",
            ));
        }
        if self.query.trim().is_empty() {
            return Err(SluiceError::invalid_table(&self.name, "query is empty"));
        }
        if self.load_type == LoadType::Incremental {
            for placeholder in [WINDOW_START, WINDOW_END] {
                if !self.query.contains(placeholder) {
                    return Err(SluiceError::invalid_table(
                        &self.name,
                        format!("incremental query must contain {placeholder}"),
                    ));
                }
            }
        }
        Ok(())
    }
}
