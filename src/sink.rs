//! Versioned SQLite persistence for the assembled feature table.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{FeatureDType, FeatureRow, FeatureSchema};

const ROWS_TABLE: &str = "feature_rows";
const META_TABLE: &str = "feature_table_meta";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkWriteReport {
    pub rows_written: u64,
    pub rows_replaced: u64,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store has no feature table metadata")]
    MissingMetadata,
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
    #[error("stored day '{value}' is not a valid date")]
    InvalidStoredDay { value: String },
}

/// Replaces the stored feature table with `rows` in a single transaction.
/// The store either keeps the previous table intact or holds the complete
/// new one; re-running with identical rows leaves identical contents.
pub fn write_feature_table(
    store_path: &Path,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
) -> Result<SinkWriteReport, SinkError> {
    info!(
        component = "sink",
        event = "sink.write.start",
        store_path = %store_path.display(),
        rows = rows.len(),
        fingerprint = %schema.fingerprint
    );

    let mut conn = Connection::open(store_path)?;
    let tx = conn.transaction()?;

    let rows_replaced = existing_row_count(&tx)?;

    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {ROWS_TABLE};
         DROP TABLE IF EXISTS {META_TABLE};
         CREATE TABLE {META_TABLE} (
             schema_version INTEGER NOT NULL,
             fingerprint TEXT NOT NULL
         );"
    ))?;
    tx.execute_batch(&create_rows_table_sql(schema))?;

    tx.execute(
        &format!("INSERT INTO {META_TABLE} (schema_version, fingerprint) VALUES (?1, ?2)"),
        params![schema.version, schema.fingerprint],
    )?;

    {
        let mut stmt = tx.prepare(&insert_row_sql(schema))?;
        for row in rows {
            stmt.execute(params![
                row.day.to_string(),
                row.user_id,
                i64::from(row.position),
                row.value_prop,
                row.was_clicked,
                row.prints_3w_before,
                row.taps_3w_before,
                row.pays_3w_before,
                row.amount_3w_before,
            ])?;
        }
    }

    tx.commit()?;

    info!(
        component = "sink",
        event = "sink.write.finish",
        store_path = %store_path.display(),
        rows_written = rows.len(),
        rows_replaced = rows_replaced
    );

    Ok(SinkWriteReport {
        rows_written: rows.len() as u64,
        rows_replaced,
    })
}

/// Reads the stored table back in write order, after verifying that the
/// stored schema version and fingerprint match `expected`.
pub fn read_feature_table(
    store_path: &Path,
    expected: &FeatureSchema,
) -> Result<Vec<FeatureRow>, SinkError> {
    let conn = Connection::open_with_flags(store_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    verify_stored_schema(&conn, expected)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT day, user_id, position, value_prop, was_clicked,
                prints_3w_before, taps_3w_before, pays_3w_before, amount_3w_before
         FROM {ROWS_TABLE}
         ORDER BY rowid ASC"
    ))?;

    let mut stored = stmt.query([])?;
    let mut rows = Vec::new();
    while let Some(row) = stored.next()? {
        let day_raw: String = row.get(0)?;
        let day = day_raw
            .parse()
            .map_err(|_| SinkError::InvalidStoredDay { value: day_raw })?;

        rows.push(FeatureRow {
            day,
            user_id: row.get(1)?,
            position: row.get::<_, i64>(2)? as i32,
            value_prop: row.get(3)?,
            was_clicked: row.get(4)?,
            prints_3w_before: row.get(5)?,
            taps_3w_before: row.get(6)?,
            pays_3w_before: row.get(7)?,
            amount_3w_before: row.get(8)?,
        });
    }

    Ok(rows)
}

fn existing_row_count(tx: &Transaction<'_>) -> Result<u64, SinkError> {
    let table_exists: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![ROWS_TABLE],
        |row| row.get(0),
    )?;
    if !table_exists {
        return Ok(0);
    }

    let count: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {ROWS_TABLE}"), [], |row| {
        row.get(0)
    })?;
    Ok(count as u64)
}

fn verify_stored_schema(conn: &Connection, expected: &FeatureSchema) -> Result<(), SinkError> {
    let meta_exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![META_TABLE],
        |row| row.get(0),
    )?;
    if !meta_exists {
        return Err(SinkError::MissingMetadata);
    }

    let (version, fingerprint): (u32, String) = conn.query_row(
        &format!("SELECT schema_version, fingerprint FROM {META_TABLE}"),
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    if version != expected.version {
        return Err(SinkError::SchemaVersionMismatch {
            expected: expected.version,
            actual: version,
        });
    }
    if fingerprint != expected.fingerprint {
        return Err(SinkError::SchemaFingerprintMismatch {
            expected: expected.fingerprint.clone(),
            actual: fingerprint,
        });
    }

    Ok(())
}

fn create_rows_table_sql(schema: &FeatureSchema) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|column| format!("{} {} NOT NULL", column.name, sqlite_type(column.dtype)))
        .collect();
    format!("CREATE TABLE {ROWS_TABLE} ({});", columns.join(", "))
}

fn insert_row_sql(schema: &FeatureSchema) -> String {
    let names: Vec<&str> = schema
        .columns
        .iter()
        .map(|column| column.name.as_str())
        .collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|idx| format!("?{idx}")).collect();
    format!(
        "INSERT INTO {ROWS_TABLE} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

fn sqlite_type(dtype: FeatureDType) -> &'static str {
    match dtype {
        FeatureDType::Date | FeatureDType::Text => "TEXT",
        FeatureDType::Int => "INTEGER",
        FeatureDType::Float => "REAL",
    }
}
