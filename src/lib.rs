//! VPF core crate: value-proposition feature pipeline.
//!
//! Implemented scope:
//! - typed ingestion of the prints, taps and pays raw exports
//! - observation-window derivation and labeled feature-table construction
//! - versioned SQLite persistence of the assembled table

mod features;
mod ingest;
mod observability;
mod pipeline;
mod sink;

pub use features::{
    build_feature_schema, build_feature_table, derive_observation_window, FeatureBuildConfig,
    FeatureBuildReport, FeatureColumn, FeatureDType, FeatureError, FeatureRow, FeatureSchema,
    ObservationWindow, FEATURE_SCHEMA_VERSION,
};
pub use ingest::{
    load_event_records, load_payment_records, EventRecord, IngestError, PaymentRecord,
};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use pipeline::{
    pipeline_config_from_env, run_pipeline, PipelineConfig, PipelineError, PipelineReport,
};
pub use sink::{read_feature_table, write_feature_table, SinkError, SinkWriteReport};
