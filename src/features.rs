//! Labeled feature-table construction over the prints, taps and pays relations.

use std::collections::{HashMap, HashSet};

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::ingest::{EventRecord, PaymentRecord};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// The nine output columns in their fixed on-disk order. The `*_3w_before`
/// names are kept verbatim from the upstream model contract; they aggregate
/// everything strictly before the observation window, with no lower bound.
const OUTPUT_COLUMNS: [(&str, FeatureDType); 9] = [
    ("day", FeatureDType::Date),
    ("user_id", FeatureDType::Int),
    ("position", FeatureDType::Int),
    ("value_prop", FeatureDType::Text),
    ("was_clicked", FeatureDType::Int),
    ("prints_3w_before", FeatureDType::Int),
    ("taps_3w_before", FeatureDType::Int),
    ("pays_3w_before", FeatureDType::Int),
    ("amount_3w_before", FeatureDType::Float),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    Date,
    Int,
    Text,
    Float,
}

impl FeatureDType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Int => "int",
            Self::Text => "text",
            Self::Float => "float",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

/// One output row per current-window print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub day: NaiveDate,
    pub user_id: i64,
    pub position: i32,
    pub value_prop: String,
    pub was_clicked: i64,
    pub prints_3w_before: i64,
    pub taps_3w_before: i64,
    pub pays_3w_before: i64,
    pub amount_3w_before: f64,
}

/// Inclusive span of the most recent print days. Current rows have
/// `day >= start`; history is everything dated strictly before `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ObservationWindow {
    pub fn is_current(&self, day: NaiveDate) -> bool {
        day >= self.start
    }

    pub fn is_history(&self, date: NaiveDate) -> bool {
        date < self.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBuildConfig {
    pub window_days: u32,
    pub schema_version: u32,
}

impl Default for FeatureBuildConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureBuildReport {
    pub window: ObservationWindow,
    pub input_prints: u64,
    pub input_taps: u64,
    pub input_pays: u64,
    pub clicked_prints: u64,
    pub history_prints: u64,
    pub history_taps: u64,
    pub history_pays: u64,
    pub output_rows: u64,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("invalid feature build config: {0}")]
    InvalidConfig(String),
    #[error("prints relation is empty; observation window is undefined")]
    NoPrintsData,
    #[error("observation window start underflows the calendar before {max_day}")]
    WindowUnderflow { max_day: NaiveDate },
}

#[derive(Debug, Clone, Copy, Default)]
struct PaymentHistory {
    count: i64,
    amount: f64,
}

pub fn build_feature_schema(cfg: &FeatureBuildConfig) -> FeatureSchema {
    let columns: Vec<FeatureColumn> = OUTPUT_COLUMNS
        .iter()
        .map(|(name, dtype)| FeatureColumn {
            name: (*name).to_string(),
            dtype: *dtype,
        })
        .collect();

    let fingerprint = schema_fingerprint(cfg.schema_version, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        column_count = columns.len(),
        fingerprint = %fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

/// Derives the observation window from the prints relation alone:
/// `[max(day) - (window_days - 1), max(day)]`. An empty prints relation is
/// fatal; every downstream partition depends on this boundary.
pub fn derive_observation_window(
    prints: &[EventRecord],
    cfg: &FeatureBuildConfig,
) -> Result<ObservationWindow, FeatureError> {
    validate_config(cfg)?;

    let max_day = prints
        .iter()
        .map(|record| record.day)
        .max()
        .ok_or(FeatureError::NoPrintsData)?;

    let span = ChronoDuration::days(i64::from(cfg.window_days) - 1);
    let start = max_day
        .checked_sub_signed(span)
        .ok_or(FeatureError::WindowUnderflow { max_day })?;

    Ok(ObservationWindow {
        start,
        end: max_day,
    })
}

/// Builds the labeled feature table: one row per current-window print, with
/// the click label and the per (user_id, value_prop) historical aggregates
/// attached, sorted by (day, user_id).
pub fn build_feature_table(
    prints: &[EventRecord],
    taps: &[EventRecord],
    pays: &[PaymentRecord],
    cfg: &FeatureBuildConfig,
) -> Result<(FeatureSchema, Vec<FeatureRow>, FeatureBuildReport), FeatureError> {
    let window = derive_observation_window(prints, cfg)?;

    info!(
        component = "features",
        event = "features.build.start",
        window_start = %window.start,
        window_end = %window.end,
        input_prints = prints.len(),
        input_taps = taps.len(),
        input_pays = pays.len()
    );

    let schema = build_feature_schema(cfg);

    // Duplicate tap tuples collapse into one key; the label join tests
    // membership only and cannot change the print cardinality.
    let tap_keys: HashSet<(NaiveDate, i64, i32, &str)> = taps
        .iter()
        .map(|tap| (tap.day, tap.user_id, tap.position, tap.value_prop.as_str()))
        .collect();

    let print_history = count_by_user_prop(
        prints
            .iter()
            .filter(|record| window.is_history(record.day))
            .map(user_prop_key),
    );
    let tap_history = count_by_user_prop(
        taps.iter()
            .filter(|record| window.is_history(record.day))
            .map(user_prop_key),
    );
    let pay_history =
        sum_payments_by_user_prop(pays.iter().filter(|pay| window.is_history(pay.pay_date)));

    let mut rows = Vec::new();
    let mut clicked_prints = 0u64;
    for print in prints.iter().filter(|record| window.is_current(record.day)) {
        let event_key = (
            print.day,
            print.user_id,
            print.position,
            print.value_prop.as_str(),
        );
        let was_clicked = i64::from(tap_keys.contains(&event_key));
        clicked_prints += was_clicked as u64;

        // Missing history keys fill with zero here, at assembly time only.
        let user_prop = (print.user_id, print.value_prop.as_str());
        let payments = pay_history.get(&user_prop);

        rows.push(FeatureRow {
            day: print.day,
            user_id: print.user_id,
            position: print.position,
            value_prop: print.value_prop.clone(),
            was_clicked,
            prints_3w_before: print_history.get(&user_prop).copied().unwrap_or(0),
            taps_3w_before: tap_history.get(&user_prop).copied().unwrap_or(0),
            pays_3w_before: payments.map(|history| history.count).unwrap_or(0),
            amount_3w_before: payments.map(|history| history.amount).unwrap_or(0.0),
        });
    }

    // Stable sort; ties keep input row order.
    rows.sort_by_key(|row| (row.day, row.user_id));

    let report = FeatureBuildReport {
        window,
        input_prints: prints.len() as u64,
        input_taps: taps.len() as u64,
        input_pays: pays.len() as u64,
        clicked_prints,
        history_prints: print_history.values().map(|count| *count as u64).sum(),
        history_taps: tap_history.values().map(|count| *count as u64).sum(),
        history_pays: pay_history.values().map(|entry| entry.count as u64).sum(),
        output_rows: rows.len() as u64,
    };

    info!(
        component = "features",
        event = "features.build.finish",
        output_rows = report.output_rows,
        clicked_prints = report.clicked_prints,
        history_prints = report.history_prints,
        history_taps = report.history_taps,
        history_pays = report.history_pays
    );

    Ok((schema, rows, report))
}

fn validate_config(cfg: &FeatureBuildConfig) -> Result<(), FeatureError> {
    if cfg.window_days == 0 {
        return Err(FeatureError::InvalidConfig(
            "window_days must be > 0".to_string(),
        ));
    }

    if cfg.schema_version != FEATURE_SCHEMA_VERSION {
        return Err(FeatureError::InvalidConfig(format!(
            "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
        )));
    }

    Ok(())
}

fn user_prop_key(record: &EventRecord) -> (i64, &str) {
    (record.user_id, record.value_prop.as_str())
}

fn count_by_user_prop<'a>(
    keys: impl Iterator<Item = (i64, &'a str)>,
) -> HashMap<(i64, &'a str), i64> {
    let mut counts = HashMap::new();
    for key in keys {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

fn sum_payments_by_user_prop<'a>(
    pays: impl Iterator<Item = &'a PaymentRecord>,
) -> HashMap<(i64, &'a str), PaymentHistory> {
    let mut totals: HashMap<(i64, &str), PaymentHistory> = HashMap::new();
    for pay in pays {
        let entry = totals
            .entry((pay.user_id, pay.value_prop.as_str()))
            .or_default();
        entry.count += 1;
        entry.amount += pay.total;
    }
    totals
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{};", column.dtype.as_str()));
    }
    hex::encode(hasher.finalize())
}
