//! Export of stored records as JSON Lines or CSV

use crate::storage::{Record, RecordStore};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// File format of an export, picked from the target's extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    JsonLines,
    Csv,
}

impl ExportFormat {
    /// `.csv` means CSV; anything else is JSON Lines
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::JsonLines,
        }
    }
}

/// Resolves the export target
///
/// A directory gets a timestamped `records_YYYYMMDDHHMMSS.csv` inside it.
pub fn export_target(path: &Path, now: DateTime<Utc>) -> PathBuf {
    if path.is_dir() {
        path.join(format!("records_{}.csv", now.format("%Y%m%d%H%M%S")))
    } else {
        path.to_path_buf()
    }
}

/// Writes every stored record to `path` in the format its extension names
///
/// Returns the number of records written.
pub fn export_records(store: &dyn RecordStore, path: &Path) -> Result<usize, HarvestError> {
    match ExportFormat::from_path(path) {
        ExportFormat::Csv => export_csv(store, path),
        ExportFormat::JsonLines => export_jsonl(store, path),
    }
}

/// Writes every stored record to `path`, one JSON object per line
///
/// Returns the number of records written.
pub fn export_jsonl(store: &dyn RecordStore, path: &Path) -> Result<usize, HarvestError> {
    let records = store.load_records()?;
    let mut writer = BufWriter::new(File::create(path)?);
    write_jsonl(&records, &mut writer)?;
    writer.flush()?;
    Ok(records.len())
}

/// Serializes `records` as JSON Lines into `writer`
pub fn write_jsonl<W: Write>(records: &[Record], writer: &mut W) -> Result<(), HarvestError> {
    for record in records {
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Writes every stored record to `path` as CSV
pub fn export_csv(store: &dyn RecordStore, path: &Path) -> Result<usize, HarvestError> {
    let records = store.load_records()?;
    let mut writer = BufWriter::new(File::create(path)?);
    write_csv(&records, &mut writer)?;
    writer.flush()?;
    Ok(records.len())
}

/// Writes `records` as CSV with a header row
///
/// Columns are `rule`, `source_url`, `extracted_at`, then the union of all
/// field names in sorted order. A record without a field leaves its cell
/// empty.
pub fn write_csv<W: Write>(records: &[Record], writer: &mut W) -> io::Result<()> {
    let fields: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let mut header = vec!["rule", "source_url", "extracted_at"];
    header.extend(fields.iter().copied());
    write_row(&mut *writer, &header)?;

    for record in records {
        let extracted_at = record.extracted_at.to_rfc3339();
        let mut row = vec![
            record.rule.as_str(),
            record.source_url.as_str(),
            extracted_at.as_str(),
        ];
        row.extend(
            fields
                .iter()
                .map(|name| record.fields.get(*name).map_or("", String::as_str)),
        );
        write_row(&mut *writer, &row)?;
    }
    Ok(())
}

fn needs_quotes(cell: &str) -> bool {
    cell.contains([',', '"', '\n', '\r'])
}

fn write_row<W: Write>(mut writer: W, row: &[&str]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        if needs_quotes(cell) {
            write!(writer, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            writer.write_all(cell.as_bytes())?;
        }
    }
    writer.write_all(b"\r\n")
}
