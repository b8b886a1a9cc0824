//! Typed ingestion of the three raw exports: prints, taps and pays.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A flattened print or tap event. Prints and taps share one shape, and
/// duplicate rows are distinct events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub day: NaiveDate,
    pub user_id: i64,
    pub position: i32,
    pub value_prop: String,
}

/// A completed payment attributed to a value proposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub pay_date: NaiveDate,
    pub total: f64,
    pub user_id: i64,
    pub value_prop: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed record at {path}:{line}: {message}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("failed to parse field {field} value '{value}'")]
    ParseField { field: &'static str, value: String },
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    position: i32,
    value_prop: String,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    day: String,
    user_id: i64,
    event_data: RawEventData,
}

/// Loads a prints or taps export: one JSON object per line, with the nested
/// `event_data` attributes flattened into top-level fields.
pub fn load_event_records(path: &Path) -> Result<Vec<EventRecord>, IngestError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let raw: RawEvent =
            serde_json::from_str(&line).map_err(|err| IngestError::MalformedRecord {
                path: path.to_path_buf(),
                line: idx + 1,
                message: err.to_string(),
            })?;

        records.push(EventRecord {
            day: parse_date(&raw.day, "day")?,
            user_id: raw.user_id,
            position: raw.event_data.position,
            value_prop: raw.event_data.value_prop,
        });
    }

    info!(
        component = "ingest",
        event = "ingest.events.loaded",
        path = %path.display(),
        rows = records.len()
    );

    Ok(records)
}

/// Loads the pays export: headered CSV with `pay_date`, `total`, `user_id`
/// and `value_prop` columns, resolvable by name in any order.
pub fn load_payment_records(path: &Path) -> Result<Vec<PaymentRecord>, IngestError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let pay_date_idx = column_index(&headers, path, "pay_date")?;
    let total_idx = column_index(&headers, path, "total")?;
    let user_id_idx = column_index(&headers, path, "user_id")?;
    let value_prop_idx = column_index(&headers, path, "value_prop")?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(PaymentRecord {
            pay_date: parse_date(raw_field(&record, pay_date_idx), "pay_date")?,
            total: parse_f64(&record, total_idx, "total")?,
            user_id: parse_i64(&record, user_id_idx, "user_id")?,
            value_prop: raw_field(&record, value_prop_idx).to_string(),
        });
    }

    info!(
        component = "ingest",
        event = "ingest.payments.loaded",
        path = %path.display(),
        rows = records.len()
    );

    Ok(records)
}

fn column_index(
    headers: &StringRecord,
    path: &Path,
    column: &'static str,
) -> Result<usize, IngestError> {
    headers
        .iter()
        .position(|name| name.trim() == column)
        .ok_or_else(|| IngestError::MissingColumn {
            path: path.to_path_buf(),
            column,
        })
}

fn raw_field<'a>(record: &'a StringRecord, idx: usize) -> &'a str {
    record.get(idx).unwrap_or_default()
}

fn parse_date(raw: &str, field: &'static str) -> Result<NaiveDate, IngestError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| IngestError::ParseField {
        field,
        value: raw.to_string(),
    })
}

fn parse_i64(record: &StringRecord, idx: usize, field: &'static str) -> Result<i64, IngestError> {
    let raw = raw_field(record, idx);
    raw.trim()
        .parse::<i64>()
        .map_err(|_| IngestError::ParseField {
            field,
            value: raw.to_string(),
        })
}

fn parse_f64(record: &StringRecord, idx: usize, field: &'static str) -> Result<f64, IngestError> {
    let raw = raw_field(record, idx);
    raw.trim()
        .parse::<f64>()
        .map_err(|_| IngestError::ParseField {
            field,
            value: raw.to_string(),
        })
}
