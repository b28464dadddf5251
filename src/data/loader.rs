use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde_json::Value as JsonValue;

use super::model::{EventTable, Meta, MetadataValue};
use crate::sample::SampleReader;

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Reads event tables from `.parquet`, `.json` and `.csv` files.
///
/// * `.parquet` – one numeric column per channel; metadata in the footer's
///   key/value section.
/// * `.json`    – `{ "meta": {...}, "channels": [...], "columns": [[...], ...] }`
/// * `.csv`     – leading `# key=value` lines, then a header of channel names
///   and one numeric row per event.
pub struct TableReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Parquet,
    Json,
    Csv,
}

fn format_of(path: &Path) -> Result<Format> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => Ok(Format::Parquet),
        "json" => Ok(Format::Json),
        "csv" => Ok(Format::Csv),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

impl SampleReader for TableReader {
    type Data = EventTable;

    fn read_data(path: &Path) -> Result<EventTable> {
        let table = match format_of(path)? {
            Format::Parquet => parquet_table(path),
            Format::Json => json_table(path),
            Format::Csv => csv_table(path),
        }?;
        debug!("{path:?}: {} events x {} channels", table.num_events(), table.channels.len());
        Ok(table)
    }

    fn read_meta(path: &Path) -> Result<Meta> {
        match format_of(path)? {
            Format::Parquet => parquet_meta(path),
            Format::Json => json_meta(path),
            Format::Csv => csv_meta(path),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn read_json(path: &Path) -> Result<JsonValue> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    serde_json::from_str(&text).context("parsing JSON")
}

fn json_table(path: &Path) -> Result<EventTable> {
    let root = read_json(path)?;
    let obj = root.as_object().context("Expected top-level JSON object")?;

    let channels = obj
        .get("channels")
        .and_then(|v| v.as_array())
        .context("missing or invalid 'channels' array")?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str()
                .map(str::to_string)
                .with_context(|| format!("channels[{i}] is not a string"))
        })
        .collect::<Result<Vec<_>>>()?;

    let columns = obj
        .get("columns")
        .and_then(|v| v.as_array())
        .context("missing or invalid 'columns' array")?
        .iter()
        .enumerate()
        .map(|(i, col)| json_array_to_f64(col, i))
        .collect::<Result<Vec<_>>>()?;

    EventTable::new(channels, columns)
}

fn json_array_to_f64(val: &JsonValue, col: usize) -> Result<Vec<f64>> {
    let arr = val
        .as_array()
        .with_context(|| format!("columns[{col}] is not an array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("columns[{col}][{j}]: not a number"))
        })
        .collect()
}

/// The `meta` object, or for sidecar files without one, every top-level entry.
fn json_meta(path: &Path) -> Result<Meta> {
    let root = read_json(path)?;
    let obj = root
        .get("meta")
        .unwrap_or(&root)
        .as_object()
        .context("Expected a JSON object of metadata")?;

    Ok(obj
        .iter()
        .filter(|(key, _)| *key != "channels" && *key != "columns")
        .map(|(key, val)| (key.clone(), json_to_metadata(val)))
        .collect())
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn csv_table(path: &Path) -> Result<EventTable> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .context("opening CSV")?;
    let channels: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut columns = vec![Vec::new(); channels.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (col, value) in record.iter().enumerate() {
            let parsed = value.parse::<f64>().with_context(|| {
                format!("CSV row {row_no}, column '{}': '{value}' is not a number", channels[col])
            })?;
            columns[col].push(parsed);
        }
    }

    EventTable::new(channels, columns)
}

/// Leading `# key=value` lines. Comment lines without `=` are ignored.
fn csv_meta(path: &Path) -> Result<Meta> {
    let file = File::open(path).context("opening CSV")?;
    let mut meta = Meta::new();
    for line in BufReader::new(file).lines() {
        let line = line.context("reading CSV")?;
        let Some(comment) = line.strip_prefix('#') else {
            break;
        };
        if let Some((key, value)) = comment.split_once('=') {
            meta.insert(key.trim().to_string(), MetadataValue::guess(value.trim()));
        }
    }
    Ok(meta)
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn parquet_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = File::open(path).context("opening parquet file")?;
    ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")
}

/// Load every numeric column as a channel. Nulls become `NaN`.
fn parquet_table(path: &Path) -> Result<EventTable> {
    let builder = parquet_builder(path)?;
    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let numeric: Vec<(usize, String)> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.data_type().is_numeric())
        .map(|(i, f)| (i, f.name().clone()))
        .collect();
    if numeric.len() < schema.fields().len() {
        debug!(
            "{path:?}: skipping {} non-numeric columns",
            schema.fields().len() - numeric.len()
        );
    }

    let mut columns = vec![Vec::new(); numeric.len()];
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (slot, (col_idx, name)) in numeric.iter().enumerate() {
            let values = extract_f64(batch.column(*col_idx))
                .with_context(|| format!("reading channel '{name}'"))?;
            columns[slot].extend(values);
        }
    }

    EventTable::new(numeric.into_iter().map(|(_, name)| name).collect(), columns)
}

fn extract_f64(col: &ArrayRef) -> Result<Vec<f64>> {
    let cast = arrow::compute::cast(col, &DataType::Float64).context("casting to Float64")?;
    let arr = cast
        .as_any()
        .downcast_ref::<Float64Array>()
        .context("expected Float64Array")?;
    Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Footer key/value pairs, typed with [`MetadataValue::guess`]. Arrow's own
/// schema entry is skipped.
fn parquet_meta(path: &Path) -> Result<Meta> {
    let builder = parquet_builder(path)?;
    let pairs = builder.metadata().file_metadata().key_value_metadata();
    Ok(pairs
        .into_iter()
        .flatten()
        .filter(|kv| !kv.key.starts_with("ARROW:"))
        .map(|kv| {
            let value = kv
                .value
                .as_deref()
                .map_or(MetadataValue::Null, MetadataValue::guess);
            (kv.key.clone(), value)
        })
        .collect())
}

fn meta_text(value: &MetadataValue) -> Option<String> {
    match value {
        MetadataValue::Null => None,
        MetadataValue::Float(v) => Some(v.to_string()),
        other => Some(other.to_string()),
    }
}

/// Write `table` as Parquet, storing `meta` in the footer.
pub fn write_parquet(path: &Path, table: &EventTable, meta: &Meta) -> Result<()> {
    if table.channels.is_empty() {
        bail!("cannot write an event table without channels");
    }
    let schema = Arc::new(Schema::new(
        table
            .channels
            .iter()
            .map(|name| Field::new(name, DataType::Float64, false))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = table
        .columns
        .iter()
        .map(|col| Arc::new(Float64Array::from(col.clone())) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;

    let key_values: Vec<KeyValue> = meta
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), meta_text(v)))
        .collect();
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(key_values))
        .build();

    let file = File::create(path).with_context(|| format!("creating {path:?}"))?;
    let mut writer =
        ArrowWriter::try_new(file, schema, Some(props)).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("finishing parquet file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EventTable {
        EventTable::new(
            vec!["FSC-A".into(), "SSC-A".into()],
            vec![vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]],
        )
        .unwrap()
    }

    #[test]
    fn parquet_data_and_footer_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate_A1.parquet");
        let meta = Meta::from([
            ("$SRC".to_string(), MetadataValue::from("A1")),
            ("$TOT".to_string(), MetadataValue::Integer(3)),
            ("gain".to_string(), MetadataValue::Float(0.125)),
            ("empty".to_string(), MetadataValue::Null),
        ]);
        write_parquet(&path, &table(), &meta).unwrap();

        assert_eq!(TableReader::read_data(&path).unwrap(), table());
        let read = TableReader::read_meta(&path).unwrap();
        assert_eq!(read["$SRC"], MetadataValue::from("A1"));
        assert_eq!(read["$TOT"], MetadataValue::Integer(3));
        assert_eq!(read["gain"], MetadataValue::Float(0.125));
        assert_eq!(read["empty"], MetadataValue::Null);
        assert!(read.keys().all(|k| !k.starts_with("ARROW:")));
    }

    #[test]
    fn json_table_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.json");
        std::fs::write(
            &path,
            r#"{"meta": {"$SRC": "B2", "dose": 5},
                "channels": ["FSC-A", "SSC-A"],
                "columns": [[1, 2, 3], [10, 20, 30]]}"#,
        )
        .unwrap();
        assert_eq!(TableReader::read_data(&path).unwrap(), table());
        let meta = TableReader::read_meta(&path).unwrap();
        assert_eq!(meta["$SRC"], MetadataValue::from("B2"));
        assert_eq!(meta["dose"], MetadataValue::Integer(5));

        let sidecar = dir.path().join("side.json");
        std::fs::write(&sidecar, r#"{"operator": "Ana", "ok": true}"#).unwrap();
        let meta = TableReader::read_meta(&sidecar).unwrap();
        assert_eq!(meta["ok"], MetadataValue::Bool(true));
        assert!(TableReader::read_data(&sidecar).is_err());
    }

    #[test]
    fn csv_comments_are_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.csv");
        std::fs::write(
            &path,
            "# $SRC=C3\n# note without value\n# dose = 2.5\nFSC-A,SSC-A\n1,10\n2,20\n3,30\n",
        )
        .unwrap();
        assert_eq!(TableReader::read_data(&path).unwrap(), table());
        let meta = TableReader::read_meta(&path).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["$SRC"], MetadataValue::from("C3"));
        assert_eq!(meta["dose"], MetadataValue::Float(2.5));
    }

    #[test]
    fn bad_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("bad.csv");
        std::fs::write(&csv, "FSC-A\nabc\n").unwrap();
        let err = TableReader::read_data(&csv).unwrap_err();
        assert!(format!("{err:#}").contains("not a number"));

        assert!(TableReader::read_data(Path::new("x.fcs")).is_err());
        assert!(TableReader::read_meta(&dir.path().join("missing.parquet")).is_err());
    }
}
