mod encode;

use std::ops::Range;

use arrow::record_batch::RecordBatch;
use bytes::Bytes;

use crate::conf::BatchFormat;
use crate::core::SluiceError;
use crate::source::ExtractionResult;

pub use encode::encode;

/// A bounded slice of one extraction, the unit of delivery.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based, contiguous within one extraction.
    pub sequence: u32,
    pub table: String,
    pub rows: Range<usize>,
    data: RecordBatch,
}

impl Batch {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn data(&self) -> &RecordBatch {
        &self.data
    }

    pub fn encode(&self, format: BatchFormat) -> Result<Bytes, SluiceError> {
        encode(&self.data, format)
    }
}

/// Splits `result` into `ceil(rows / batch_size)` batches. Batch `i` covers
/// rows `[i * batch_size, min((i + 1) * batch_size, rows))`; an empty result
/// yields no batches. Slices share the underlying buffers of `result`.
pub fn partition(result: &ExtractionResult, batch_size: usize) -> Vec<Batch> {
    assert!(batch_size > 0, "batch_size must be positive");
    let total = result.row_count();
    let source = result.batch();

    (0..total.div_ceil(batch_size))
        .map(|i| {
            let start = i * batch_size;
            let end = usize::min(start + batch_size, total);
            Batch {
                sequence: (i + 1) as u32,
                table: result.table().to_string(),
                rows: start..end,
                data: source.slice(start, end - start),
            }
        })
        .collect()
}
