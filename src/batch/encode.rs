use arrow::csv::WriterBuilder;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;

use crate::conf::BatchFormat;
use crate::core::SluiceError;

/// Serializes one batch into a self-contained object: CSV with a header line,
/// or a single-row-group Parquet file.
pub fn encode(batch: &RecordBatch, format: BatchFormat) -> Result<Bytes, SluiceError> {
    let mut buf = Vec::new();
    match format {
        BatchFormat::Csv => {
            let mut writer = WriterBuilder::new().with_header(true).build(&mut buf);
            writer.write(batch)?;
        }
        BatchFormat::Parquet => {
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None)?;
            writer.write(batch)?;
            writer.close()?;
        }
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::sync::Arc;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("price", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("widget, large"), None])),
                Arc::new(Float64Array::from(vec![Some(9.5), Some(3.0)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_csv_has_header_and_quotes() {
        let bytes = encode(&batch(), BatchFormat::Csv).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "id,name,price");
        assert_eq!(lines[1], "1,\"widget, large\",9.5");
        assert!(lines[2].starts_with("2,,"));
    }

    #[test]
    fn test_parquet_is_readable() {
        let bytes = encode(&batch(), BatchFormat::Parquet).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_empty_csv_is_header_only() {
        let empty = batch().slice(0, 0);
        let bytes = encode(&empty, BatchFormat::Csv).unwrap();
        assert_eq!(std::str::from_utf8(&bytes).unwrap().trim_end(), "id,name,price");
    }
}
