//! End-to-end orchestration: ingest, transform, persist.
//!
//! All stages receive an explicit [`PipelineConfig`]; there is no ambient
//! session state. A run either completes and commits the overwrite or fails
//! before anything is written.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{
    build_feature_table, FeatureBuildConfig, FeatureBuildReport, FeatureError,
};
use crate::ingest::{load_event_records, load_payment_records, IngestError};
use crate::sink::{write_feature_table, SinkError, SinkWriteReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub prints_path: PathBuf,
    pub taps_path: PathBuf,
    pub pays_path: PathBuf,
    pub output_store: PathBuf,
    pub features: FeatureBuildConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prints_path: PathBuf::from("data/prints.json"),
            taps_path: PathBuf::from("data/taps.json"),
            pays_path: PathBuf::from("data/pays.csv"),
            output_store: PathBuf::from("data/feature_dataset.sqlite"),
            features: FeatureBuildConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ingest failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("feature build failed: {0}")]
    Features(#[from] FeatureError),
    #[error("sink write failed: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub build: FeatureBuildReport,
    pub sink: SinkWriteReport,
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(path) = path_from_env("VPF_PRINTS_PATH") {
        config.prints_path = path;
    }
    if let Some(path) = path_from_env("VPF_TAPS_PATH") {
        config.taps_path = path;
    }
    if let Some(path) = path_from_env("VPF_PAYS_PATH") {
        config.pays_path = path;
    }
    if let Some(path) = path_from_env("VPF_OUTPUT_STORE") {
        config.output_store = path;
    }

    config
}

pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    info!(
        component = "pipeline",
        event = "pipeline.run.start",
        prints_path = %config.prints_path.display(),
        taps_path = %config.taps_path.display(),
        pays_path = %config.pays_path.display(),
        output_store = %config.output_store.display(),
        window_days = config.features.window_days
    );

    let prints = load_event_records(&config.prints_path)?;
    let taps = load_event_records(&config.taps_path)?;
    let pays = load_payment_records(&config.pays_path)?;

    let (schema, rows, build) = build_feature_table(&prints, &taps, &pays, &config.features)?;
    let sink = write_feature_table(&config.output_store, &schema, &rows)?;

    info!(
        component = "pipeline",
        event = "pipeline.run.finish",
        window_start = %build.window.start,
        window_end = %build.window.end,
        output_rows = build.output_rows,
        rows_replaced = sink.rows_replaced
    );

    Ok(PipelineReport { build, sink })
}

fn path_from_env(key: &str) -> Option<PathBuf> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}
