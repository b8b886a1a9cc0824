use std::fs;
use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;
use vpf::{
    build_feature_table, log_app_start, run_pipeline, EventRecord, FeatureBuildConfig,
    LoggingConfig, PipelineConfig,
};

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

fn event(day: &str, user_id: i64, position: i32, value_prop: &str) -> EventRecord {
    EventRecord {
        day: day.parse().expect("valid test date"),
        user_id,
        position,
        value_prop: value_prop.to_string(),
    }
}

#[test]
fn app_start_helper_emits_baseline_event() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start(&LoggingConfig::default());
    });

    assert!(logs.contains("\"event\":\"app.start\""));
}

#[test]
fn feature_build_emits_schema_and_lifecycle_events() {
    let prints = vec![
        event("2025-08-01", 1, 0, "credit_card"),
        event("2025-08-14", 1, 1, "credit_card"),
    ];

    let logs = capture_logs(Level::INFO, || {
        build_feature_table(&prints, &[], &[], &FeatureBuildConfig::default())
            .expect("build should succeed");
    });

    assert!(logs.contains("\"event\":\"features.build.start\""));
    assert!(logs.contains("\"event\":\"features.schema.built\""));
    assert!(logs.contains("\"event\":\"features.build.finish\""));
}

#[test]
fn pipeline_run_emits_stage_events() {
    let dir = tempdir().expect("temp dir should be created");
    let write = |name: &str, body: &str| {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("seed file should be writable");
        path
    };

    let config = PipelineConfig {
        prints_path: write(
            "prints.json",
            concat!(
                r#"{"day":"2025-08-14","user_id":1,"event_data":{"position":0,"value_prop":"credit_card"}}"#,
                "\n",
            ),
        ),
        taps_path: write("taps.json", ""),
        pays_path: write("pays.csv", "pay_date,total,user_id,value_prop\n"),
        output_store: dir.path().join("feature_dataset.sqlite"),
        features: FeatureBuildConfig::default(),
    };

    let logs = capture_logs(Level::INFO, || {
        run_pipeline(&config).expect("pipeline run should succeed");
    });

    assert!(logs.contains("\"event\":\"pipeline.run.start\""));
    assert!(logs.contains("\"event\":\"ingest.events.loaded\""));
    assert!(logs.contains("\"event\":\"ingest.payments.loaded\""));
    assert!(logs.contains("\"event\":\"sink.write.start\""));
    assert!(logs.contains("\"event\":\"sink.write.finish\""));
    assert!(logs.contains("\"event\":\"pipeline.run.finish\""));
}
