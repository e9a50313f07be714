use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SluiceError {
    #[error("Cannot parse config: {0}")]
    ConfigParsingError(String),
    #[error("Invalid table '{table}': {reason}")]
    InvalidTableSpec { table: String, reason: String },
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Arrow error: {0}")]
    ArrowError(String),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Source error: {0}")]
    SourceError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Ledger error: {0}")]
    LedgerError(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Extraction failed for table '{table}': {cause}")]
    ExtractionFailed { table: String, cause: String },
    #[error("Delivery failed for table '{table}' after {batches_written} batches: {cause}")]
    DeliveryFailed {
        table: String,
        cause: String,
        batches_written: usize,
    },
    #[error("Cannot read audit ledger for table '{table}': {cause}")]
    LedgerReadFailed { table: String, cause: String },
    #[error("Cannot append audit record for table '{table}': {cause}")]
    LedgerAppendFailed { table: String, cause: String },
    #[error("Run cancelled")]
    Cancelled,
}

impl SluiceError {
    pub fn extraction(table: &str, cause: impl ToString) -> Self {
        SluiceError::ExtractionFailed {
            table: table.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Delivery failure after `batches_written` batches already reached the
    /// destination.
    pub fn delivery(table: &str, cause: impl ToString, batches_written: usize) -> Self {
        SluiceError::DeliveryFailed {
            table: table.to_string(),
            cause: cause.to_string(),
            batches_written,
        }
    }

    /// Batches left at the destination by a failed delivery.
    pub fn batches_written(&self) -> usize {
        match self {
            SluiceError::DeliveryFailed {
                batches_written, ..
            } => *batches_written,
            _ => 0,
        }
    }

    pub fn invalid_table(table: &str, reason: impl ToString) -> Self {
        SluiceError::InvalidTableSpec {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for SluiceError {
    fn from(err: std::io::Error) -> Self {
        SluiceError::IoError(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for SluiceError {
    fn from(err: arrow::error::ArrowError) -> Self {
        SluiceError::ArrowError(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for SluiceError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        SluiceError::EncodingError(err.to_string())
    }
}

impl From<object_store::Error> for SluiceError {
    fn from(err: object_store::Error) -> Self {
        SluiceError::StorageError(err.to_string())
    }
}

impl From<rusqlite::Error> for SluiceError {
    fn from(err: rusqlite::Error) -> Self {
        SluiceError::SourceError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SluiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            SluiceError::Cancelled
        } else {
            SluiceError::IoError(format!("background task panicked: {err}"))
        }
    }
}
